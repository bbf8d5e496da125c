//! # Onboarding Entities
//!
//! The kinds of DSA entity that can register, and the lifecycle an
//! onboarding application moves through.

use serde::{Deserialize, Serialize};

/// Legal form of the Direct Selling Agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Individual,
    Proprietorship,
    Partnership,
    Company,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        Self::Individual,
        Self::Proprietorship,
        Self::Partnership,
        Self::Company,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Proprietorship => "proprietorship",
            Self::Partnership => "partnership",
            Self::Company => "company",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

/// Registration form of a company-type entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanySubType {
    /// Private limited company, identified by a CIN.
    PvtLtd,
    /// Limited liability partnership, identified by an LLPIN.
    Llp,
    /// One-person company, identified by a CIN.
    Opc,
}

impl CompanySubType {
    pub const ALL: [CompanySubType; 3] = [Self::PvtLtd, Self::Llp, Self::Opc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PvtLtd => "pvt_ltd",
            Self::Llp => "llp",
            Self::Opc => "opc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Whether the registrar identifier for this form is an LLPIN rather than a CIN.
    pub fn uses_llpin(&self) -> bool {
        matches!(self, Self::Llp)
    }
}

/// Lifecycle of an onboarding application.
///
/// Variant order is the order of the wizard. `Completed` and `Rejected`
/// are terminal; a phone number may hold at most one non-terminal
/// application at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Initiated,
    KycVerified,
    PanVerified,
    BankVerified,
    CompanyVerified,
    DocumentsUploaded,
    AgreementSigned,
    Completed,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::KycVerified => "kyc_verified",
            Self::PanVerified => "pan_verified",
            Self::BankVerified => "bank_verified",
            Self::CompanyVerified => "company_verified",
            Self::DocumentsUploaded => "documents_uploaded",
            Self::AgreementSigned => "agreement_signed",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            Self::Initiated,
            Self::KycVerified,
            Self::PanVerified,
            Self::BankVerified,
            Self::CompanyVerified,
            Self::DocumentsUploaded,
            Self::AgreementSigned,
            Self::Completed,
            Self::Rejected,
        ]
        .into_iter()
        .find(|s| s.as_str() == value)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected)
    }

    /// Move forward to `next`, never backwards and never out of a terminal state.
    pub fn advance_to(self, next: ApplicationStatus) -> ApplicationStatus {
        if self.is_terminal() || next <= self {
            self
        } else {
            next
        }
    }
}

/// Wizard steps that have been completed for an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedSteps {
    pub aadhaar: bool,
    pub pan: bool,
    pub bank: bool,
    pub company: bool,
    pub documents: bool,
    pub agreement: bool,
}
