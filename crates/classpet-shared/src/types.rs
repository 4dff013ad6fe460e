use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{CLASS_CODE_ALPHABET, CLASS_CODE_LEN, MAX_STUDENT_NUMBER, PIN_LEN};
use crate::error::ValidationError;

// Tenant address = (teacherUid, classId)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ClassScope {
    pub teacher_uid: String,
    pub class_id: String,
}

impl ClassScope {
    pub fn new(teacher_uid: impl Into<String>, class_id: impl Into<String>) -> Self {
        Self {
            teacher_uid: teacher_uid.into(),
            class_id: class_id.into(),
        }
    }
}

impl std::fmt::Display for ClassScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.teacher_uid, self.class_id)
    }
}

/// Six-character class code typed by students to join a class.
///
/// Codes are case-insensitive; the canonical form is uppercase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ClassCode(String);

impl ClassCode {
    /// Normalize and validate a human-entered code.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != CLASS_CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidClassCode(input.to_string()));
        }
        Ok(Self(code))
    }

    /// Draw a fresh random code.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CLASS_CODE_LEN)
            .map(|_| CLASS_CODE_ALPHABET[rng.gen_range(0..CLASS_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClassCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClassCode> for String {
    fn from(code: ClassCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for ClassCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Four-digit student PIN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Pin(String);

impl Pin {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let pin = input.trim();
        if pin.len() != PIN_LEN || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidPin);
        }
        Ok(Self(pin.to_string()))
    }

    /// The student number zero-padded to four digits.
    pub fn default_for(number: u32) -> Result<Self, ValidationError> {
        validate_student_number(number)?;
        Ok(Self(format!("{number:0width$}", width = PIN_LEN)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pin {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.0
    }
}

pub fn validate_student_number(number: u32) -> Result<(), ValidationError> {
    if number == 0 || number > MAX_STUDENT_NUMBER {
        return Err(ValidationError::InvalidStudentNumber(number));
    }
    Ok(())
}

/// Fresh document id. Ids are minted client-side so that optimistic
/// records already carry the id their remote echo will arrive with.
pub fn new_doc_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_code_is_normalized_to_uppercase() {
        let code = ClassCode::parse("  ab12cd ").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn class_code_rejects_bad_input() {
        assert!(ClassCode::parse("ABC").is_err());
        assert!(ClassCode::parse("ABCDEFG").is_err());
        assert!(ClassCode::parse("AB-12C").is_err());
    }

    #[test]
    fn generated_codes_parse() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let code = ClassCode::generate(&mut rng);
            assert_eq!(ClassCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn default_pin_is_zero_padded() {
        assert_eq!(Pin::default_for(1).unwrap().as_str(), "0001");
        assert_eq!(Pin::default_for(27).unwrap().as_str(), "0027");
        assert_eq!(Pin::default_for(9999).unwrap().as_str(), "9999");
        assert!(Pin::default_for(0).is_err());
        assert!(Pin::default_for(10_000).is_err());
    }

    #[test]
    fn pin_must_be_four_digits() {
        assert!(Pin::parse("1234").is_ok());
        assert!(Pin::parse("123").is_err());
        assert!(Pin::parse("12a4").is_err());
    }

    #[test]
    fn pin_deserialization_validates() {
        let ok: Pin = serde_json::from_str("\"0420\"").unwrap();
        assert_eq!(ok.as_str(), "0420");
        assert!(serde_json::from_str::<Pin>("\"42\"").is_err());
    }
}
