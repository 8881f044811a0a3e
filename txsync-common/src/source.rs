//! Source kinds shared by the service, its API and its events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of upstream source a record is synchronized from
///
/// Declaration order is the fixed phase order of a sync run:
/// contacts sources first, then email, then the device backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Local contacts export (vCard)
    DirectContacts,
    /// Contacts held by a remote account provider
    FederatedContacts,
    /// Remote mailbox
    EmailProvider,
    /// Message-store snapshot taken from a device backup
    DeviceBackup,
}

impl SourceKind {
    /// All source kinds in phase order
    pub const ALL: [SourceKind; 4] = [
        SourceKind::DirectContacts,
        SourceKind::FederatedContacts,
        SourceKind::EmailProvider,
        SourceKind::DeviceBackup,
    ];

    /// Stable string form, used as database key and in settings keys
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::DirectContacts => "direct-contacts",
            SourceKind::FederatedContacts => "federated-contacts",
            SourceKind::EmailProvider => "email-provider",
            SourceKind::DeviceBackup => "device-backup",
        }
    }

    /// True for the two contacts sources
    pub fn is_contacts(&self) -> bool {
        matches!(self, SourceKind::DirectContacts | SourceKind::FederatedContacts)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown source kind: {}", s)))
    }
}
