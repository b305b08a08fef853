//! Typed ID definitions for scheduler records.

use sha2::{Digest, Sha256};

use crate::{define_id, IdError};

// =============================================================================
// Stored records
// =============================================================================

define_id!(OrgId, "org");
define_id!(SelectionPeriodId, "selp");
define_id!(ReservationId, "rsv");
define_id!(WorkWeekendId, "ww");

/// Splits `{prefix}_{rest}` and checks the prefix. Used by [`define_id!`].
#[doc(hidden)]
pub fn split_prefixed<'a>(s: &'a str, expected: &'static str) -> Result<&'a str, IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let Some((prefix, rest)) = s.split_once('_') else {
        return Err(IdError::MissingSeparator);
    };

    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_string(),
        });
    }

    Ok(rest)
}

// =============================================================================
// Derived records
// =============================================================================

/// Content-addressed reminder identifier.
///
/// Two reminders built from the same source record and kind always share an
/// ID, which is what lets downstream consumers deduplicate across passes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReminderId(String);

impl ReminderId {
    /// The prefix for reminder IDs.
    pub const PREFIX: &'static str = "rem";

    const DIGEST_HEX_LEN: usize = 32;

    /// Derive an ID from the ordered identity parts of a reminder.
    ///
    /// Parts are separated by a unit separator before hashing so that
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..Self::DIGEST_HEX_LEN / 2]))
    }

    /// Parses a reminder ID in `rem_{hex}` form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let digest = split_prefixed(s, Self::PREFIX)?;
        let valid = digest.len() == Self::DIGEST_HEX_LEN
            && digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(IdError::InvalidDigest(digest.to_string()));
        }
        Ok(Self(digest.to_string()))
    }

    /// The hex digest without prefix.
    pub fn digest(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReminderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl std::str::FromStr for ReminderId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ReminderId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ReminderId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_org_id_prefix() {
        let id = OrgId::new();
        assert!(id.to_string().starts_with("org_"));
    }

    #[test]
    fn test_period_id_roundtrip() {
        let id = SelectionPeriodId::new();
        let parsed: SelectionPeriodId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_invalid_prefix() {
        let result: Result<OrgId, _> = "rsv_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        let err = result.unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<OrgId, _> = "org01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<ReservationId, _> = "".parse();
        assert_eq!(result.unwrap_err(), IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<WorkWeekendId, _> = "ww_invalid".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_json_uses_prefixed_form() {
        let id = OrgId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: OrgId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_reminder_id_stable() {
        let a = ReminderId::derive(&["reservation", "rsv_1", "7d"]);
        let b = ReminderId::derive(&["reservation", "rsv_1", "7d"]);
        let c = ReminderId::derive(&["reservation", "rsv_1", "3d"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.digest().len(), 32);
    }

    #[test]
    fn test_reminder_id_part_boundaries() {
        let a = ReminderId::derive(&["ab", "c"]);
        let b = ReminderId::derive(&["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_reminder_id_rejects_bad_digest() {
        assert!(matches!(
            ReminderId::parse("rem_XYZ"),
            Err(IdError::InvalidDigest(_))
        ));
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = [
            OrgId::PREFIX,
            SelectionPeriodId::PREFIX,
            ReservationId::PREFIX,
            WorkWeekendId::PREFIX,
            ReminderId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }

    proptest! {
        #[test]
        fn reminder_id_display_parses_back(parts in proptest::collection::vec(".*", 1..4)) {
            let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
            let id = ReminderId::derive(&refs);
            let parsed: ReminderId = id.to_string().parse().unwrap();
            prop_assert_eq!(id, parsed);
        }
    }
}
