use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{Error, Result};
use crate::core::types::Tick;

/// Characters permitted in user-supplied keys.
const ALLOWED_KEY_CHARS: &str = "_-:.@()+,=;$!*'%";

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
enum GeneratorKind {
    /// Keys are the decimal rendering of the current tick.
    Traditional,
    /// Keys count up from `offset` in steps of `increment`.
    Autoincrement { offset: u64, increment: u64 },
    /// Random v4 UUIDs.
    Uuid,
}

/// Produces new document keys and validates user-supplied ones. `track` is
/// fed every key seen during recovery so numeric generators resume past the
/// highest key ever issued.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    kind: GeneratorKind,
    allow_user_keys: bool,
    last_value: u64,
}

impl KeyGenerator {
    /// Build a generator from the collection's `keyOptions`. `None` selects
    /// the traditional generator with user keys allowed.
    pub fn factory(options: Option<&Value>) -> Result<KeyGenerator> {
        let Some(options) = options else {
            return Ok(KeyGenerator {
                kind: GeneratorKind::Traditional,
                allow_user_keys: true,
                last_value: 0,
            });
        };

        let Some(object) = options.as_object() else {
            return Err(Error::InvalidKeyGenerator);
        };

        let allow_user_keys = object
            .get("allowUserKeys")
            .map(|v| v.as_bool().ok_or(Error::InvalidKeyGenerator))
            .transpose()?
            .unwrap_or(true);

        let kind = match object.get("type").and_then(Value::as_str) {
            None | Some("traditional") => GeneratorKind::Traditional,
            Some("uuid") => GeneratorKind::Uuid,
            Some("autoincrement") => {
                let offset = object
                    .get("offset")
                    .map(|v| v.as_u64().ok_or(Error::InvalidKeyGenerator))
                    .transpose()?
                    .unwrap_or(0);
                let increment = object
                    .get("increment")
                    .map(|v| v.as_u64().ok_or(Error::InvalidKeyGenerator))
                    .transpose()?
                    .unwrap_or(1);
                if increment == 0 {
                    return Err(Error::InvalidKeyGenerator);
                }
                GeneratorKind::Autoincrement { offset, increment }
            }
            Some(_) => return Err(Error::InvalidKeyGenerator),
        };

        Ok(KeyGenerator {
            kind,
            allow_user_keys,
            last_value: 0,
        })
    }

    /// Generate a fresh key. `tick` feeds the traditional generator.
    pub fn generate(&mut self, tick: Tick) -> String {
        match &self.kind {
            GeneratorKind::Traditional => {
                let value = tick.value().max(self.last_value + 1);
                self.last_value = value;
                value.to_string()
            }
            GeneratorKind::Autoincrement { offset, increment } => {
                let base = self.last_value.max(*offset);
                let value = base + (increment - base.wrapping_sub(*offset) % increment);
                self.last_value = value;
                value.to_string()
            }
            GeneratorKind::Uuid => Uuid::new_v4().to_string(),
        }
    }

    /// Check a user-supplied key.
    pub fn validate(&self, key: &str) -> Result<()> {
        if !self.allow_user_keys {
            return Err(Error::BadParameter(
                "collection does not allow user-supplied keys".into(),
            ));
        }
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(Error::BadParameter(format!("illegal key '{key}'")));
        }
        for c in key.chars() {
            if !c.is_ascii_alphanumeric() && !ALLOWED_KEY_CHARS.contains(c) {
                return Err(Error::BadParameter(format!("illegal key '{key}'")));
            }
        }
        Ok(())
    }

    /// Record a key observed during recovery so numeric generators never
    /// issue it again.
    pub fn track(&mut self, key: &str) {
        if let Ok(value) = key.parse::<u64>() {
            if value > self.last_value {
                self.last_value = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn traditional_uses_ticks() {
        let mut generator = KeyGenerator::factory(None).unwrap();
        assert_eq!(generator.generate(Tick(41)), "41");
        // Never goes backwards, even if ticks stall.
        assert_eq!(generator.generate(Tick(41)), "42");
    }

    #[test]
    fn autoincrement_respects_offset_and_increment() {
        let options = json!({ "type": "autoincrement", "offset": 10, "increment": 5 });
        let mut generator = KeyGenerator::factory(Some(&options)).unwrap();
        assert_eq!(generator.generate(Tick(1)), "15");
        assert_eq!(generator.generate(Tick(2)), "20");

        generator.track("33");
        assert_eq!(generator.generate(Tick(3)), "35");
    }

    #[test]
    fn bad_options_are_rejected() {
        assert!(matches!(
            KeyGenerator::factory(Some(&json!({ "type": "nope" }))),
            Err(Error::InvalidKeyGenerator)
        ));
        assert!(matches!(
            KeyGenerator::factory(Some(&json!({ "type": "autoincrement", "increment": 0 }))),
            Err(Error::InvalidKeyGenerator)
        ));
        assert!(matches!(
            KeyGenerator::factory(Some(&json!("traditional"))),
            Err(Error::InvalidKeyGenerator)
        ));
    }

    #[test]
    fn validation_enforces_charset_and_length() {
        let generator = KeyGenerator::factory(None).unwrap();
        generator.validate("a-valid_key:1").unwrap();
        assert!(generator.validate("").is_err());
        assert!(generator.validate("white space").is_err());
        assert!(generator.validate(&"x".repeat(300)).is_err());

        let no_user = KeyGenerator::factory(Some(&json!({ "allowUserKeys": false }))).unwrap();
        assert!(no_user.validate("abc").is_err());
    }

    #[test]
    fn uuid_keys_are_unique() {
        let options = json!({ "type": "uuid" });
        let mut generator = KeyGenerator::factory(Some(&options)).unwrap();
        let a = generator.generate(Tick(1));
        let b = generator.generate(Tick(1));
        assert_ne!(a, b);
        generator.validate(&a).unwrap();
    }
}
