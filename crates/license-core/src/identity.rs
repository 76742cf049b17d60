//! Domain-primitive newtype identifiers.
//!
//! Every identifier is a distinct type — you cannot pass a [`CmlId`] where a
//! [`SiteLicenseId`] is expected. Row identifiers minted by this service are
//! UUIDs; `org_id` and `site_id` are caller-supplied opaque strings (an
//! organization or a site install is named by whoever provisions it, not by
//! this service).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Wrap a string value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Access the string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(OrgId, "Opaque, globally-unique organization identifier.");
string_id!(SiteId, "Caller-supplied identifier for a site installation, unique within its org.");

uuid_id!(CmlId, "Row identifier for a Customer Master License.");
uuid_id!(SiteLicenseId, "Row identifier for a Site License.");
uuid_id!(OrgKeyId, "Row identifier for an organization signing key.");
uuid_id!(KeyId, "Row identifier for a KMS-resident key (symmetric or asymmetric).");
uuid_id!(LicenseId, "Identifier for a generated license file.");
uuid_id!(UsageEntryId, "Row identifier for a usage ledger entry.");
uuid_id!(ManifestId, "Row identifier for a usage manifest.");
