use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chart-of-accounts codes a record can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountCode {
    #[serde(rename = "2100")]
    CustomerDeposits,
    #[serde(rename = "3100")]
    OwnerDraw,
    #[serde(rename = "4000")]
    CharterRevenue,
    #[serde(rename = "4010")]
    Gratuities,
    #[serde(rename = "5000")]
    Fuel,
    #[serde(rename = "5010")]
    VehicleRepairs,
    #[serde(rename = "5020")]
    VehicleInsurance,
    #[serde(rename = "5030")]
    VehicleLease,
    #[serde(rename = "5040")]
    LicensesPermits,
    #[serde(rename = "5100")]
    ClientBeverages,
    #[serde(rename = "5200")]
    OfficeSupplies,
    #[serde(rename = "5210")]
    Telephone,
    #[serde(rename = "5220")]
    Rent,
    #[serde(rename = "5230")]
    Advertising,
    #[serde(rename = "5300")]
    BankFees,
    #[serde(rename = "5400")]
    Meals,
    #[serde(rename = "5500")]
    ProfessionalFees,
    #[serde(rename = "6000")]
    Wages,
    #[serde(rename = "6010")]
    PayrollRemittance,
}

pub const CHART_OF_ACCOUNTS: &[AccountCode] = &[
    AccountCode::CustomerDeposits,
    AccountCode::OwnerDraw,
    AccountCode::CharterRevenue,
    AccountCode::Gratuities,
    AccountCode::Fuel,
    AccountCode::VehicleRepairs,
    AccountCode::VehicleInsurance,
    AccountCode::VehicleLease,
    AccountCode::LicensesPermits,
    AccountCode::ClientBeverages,
    AccountCode::OfficeSupplies,
    AccountCode::Telephone,
    AccountCode::Rent,
    AccountCode::Advertising,
    AccountCode::BankFees,
    AccountCode::Meals,
    AccountCode::ProfessionalFees,
    AccountCode::Wages,
    AccountCode::PayrollRemittance,
];

impl AccountCode {
    pub fn code(self) -> &'static str {
        match self {
            AccountCode::CustomerDeposits => "2100",
            AccountCode::OwnerDraw => "3100",
            AccountCode::CharterRevenue => "4000",
            AccountCode::Gratuities => "4010",
            AccountCode::Fuel => "5000",
            AccountCode::VehicleRepairs => "5010",
            AccountCode::VehicleInsurance => "5020",
            AccountCode::VehicleLease => "5030",
            AccountCode::LicensesPermits => "5040",
            AccountCode::ClientBeverages => "5100",
            AccountCode::OfficeSupplies => "5200",
            AccountCode::Telephone => "5210",
            AccountCode::Rent => "5220",
            AccountCode::Advertising => "5230",
            AccountCode::BankFees => "5300",
            AccountCode::Meals => "5400",
            AccountCode::ProfessionalFees => "5500",
            AccountCode::Wages => "6000",
            AccountCode::PayrollRemittance => "6010",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccountCode::CustomerDeposits => "Customer Deposits",
            AccountCode::OwnerDraw => "Owner's Draw",
            AccountCode::CharterRevenue => "Charter Revenue",
            AccountCode::Gratuities => "Driver Gratuities",
            AccountCode::Fuel => "Fuel",
            AccountCode::VehicleRepairs => "Vehicle Repairs & Maintenance",
            AccountCode::VehicleInsurance => "Vehicle Insurance",
            AccountCode::VehicleLease => "Vehicle Lease & Financing",
            AccountCode::LicensesPermits => "Licenses & Permits",
            AccountCode::ClientBeverages => "Client Beverages & Supplies",
            AccountCode::OfficeSupplies => "Office Supplies",
            AccountCode::Telephone => "Telephone & Internet",
            AccountCode::Rent => "Rent",
            AccountCode::Advertising => "Advertising",
            AccountCode::BankFees => "Bank & Merchant Fees",
            AccountCode::Meals => "Meals & Entertainment",
            AccountCode::ProfessionalFees => "Professional Fees",
            AccountCode::Wages => "Wages",
            AccountCode::PayrollRemittance => "Payroll Remittances",
        }
    }
}

impl fmt::Display for AccountCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.name())
    }
}

impl FromStr for AccountCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CHART_OF_ACCOUNTS
            .iter()
            .copied()
            .find(|a| a.code() == s.trim())
            .ok_or_else(|| format!("Unknown account code: '{s}'"))
    }
}

/// Outcome of classification. `Unclassified` means no rule fired and is
/// never a stand-in for any real account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Account(AccountCode),
    Unclassified,
}

impl Classification {
    pub fn account(self) -> Option<AccountCode> {
        match self {
            Classification::Account(code) => Some(code),
            Classification::Unclassified => None,
        }
    }

    pub fn is_classified(self) -> bool {
        matches!(self, Classification::Account(_))
    }

    /// Storage form: the account code, or `None` for unclassified.
    pub fn to_code(self) -> Option<&'static str> {
        self.account().map(AccountCode::code)
    }

    pub fn from_code(code: Option<&str>) -> Result<Self, String> {
        match code {
            Some(c) => c.parse().map(Classification::Account),
            None => Ok(Classification::Unclassified),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Account(code) => write!(f, "{code}"),
            Classification::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let mut codes: Vec<_> = CHART_OF_ACCOUNTS.iter().map(|a| a.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), CHART_OF_ACCOUNTS.len());
    }

    #[test]
    fn from_str_by_code() {
        assert_eq!("5000".parse::<AccountCode>().unwrap(), AccountCode::Fuel);
        assert!("9999".parse::<AccountCode>().is_err());
    }

    #[test]
    fn unclassified_has_no_code() {
        assert_eq!(Classification::Unclassified.to_code(), None);
        assert_eq!(
            Classification::Account(AccountCode::Fuel).to_code(),
            Some("5000")
        );
    }

    #[test]
    fn storage_form_round_trips() {
        assert_eq!(
            Classification::from_code(Some("5100")).unwrap(),
            Classification::Account(AccountCode::ClientBeverages)
        );
        assert_eq!(
            Classification::from_code(None).unwrap(),
            Classification::Unclassified
        );
    }

    #[test]
    fn serde_uses_account_codes() {
        let json = serde_json::to_string(&AccountCode::BankFees).unwrap();
        assert_eq!(json, "\"5300\"");
    }
}
