/// Error types for OPC package operations
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpcError {
    #[error("Invalid part name '{name}': {reason}")]
    InvalidPartName { name: String, reason: &'static str },

    #[error("Duplicate part name: {0}")]
    DuplicatePartName(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Content type not found for partname: {0}")]
    UnknownContentType(String),

    #[error("Malformed [Content_Types].xml: {0}")]
    MalformedContentTypes(String),

    #[error("Dangling relationship '{r_id}' from {owner}")]
    DanglingRelationship { owner: String, r_id: String },

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Multiple relationships of type '{reltype}' from {owner}")]
    AmbiguousRelationship { owner: String, reltype: String },

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Payload of {partname} is {actual}, content type '{content_type}' expects {expected}")]
    PayloadKindMismatch {
        partname: String,
        content_type: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Part {partname} is still referenced by {}", .referenced_by.join(", "))]
    PartInUse {
        partname: String,
        referenced_by: Vec<String>,
    },

    #[error("Invalid content type: expected {expected}, got {got}")]
    InvalidContentType { expected: String, got: String },

    #[error("Failed to load part {partname}: {reason}")]
    PartLoad { partname: String, reason: String },

    #[error("Package integrity check failed with {} violation(s): {}", .0.len(), ViolationList(.0))]
    PackageIntegrity(Vec<IntegrityViolation>),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<quick_xml::Error> for OpcError {
    fn from(err: quick_xml::Error) -> Self {
        OpcError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for OpcError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        OpcError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OpcError>;

/// A single problem found by the pre-save validation pass.
///
/// Validation never stops at the first problem; every violation found is
/// collected into [`OpcError::PackageIntegrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// Neither an Override nor an extension Default types this part.
    UntypedPart { partname: String },

    /// The part carries a content type that the registry no longer resolves to.
    ContentTypeMismatch {
        partname: String,
        declared: String,
        resolved: String,
    },

    /// An internal relationship whose target is not in the part mapping.
    DanglingRelationship {
        owner: String,
        r_id: String,
        target: String,
    },

    /// A part present in the mapping but unreachable from the package root.
    OrphanPart { partname: String },
}

impl IntegrityViolation {
    /// The relationship id this violation is about, if any.
    pub fn r_id(&self) -> Option<&str> {
        match self {
            IntegrityViolation::DanglingRelationship { r_id, .. } => Some(r_id),
            _ => None,
        }
    }
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::UntypedPart { partname } => {
                write!(f, "{} has no content type", partname)
            },
            IntegrityViolation::ContentTypeMismatch {
                partname,
                declared,
                resolved,
            } => write!(
                f,
                "{} declares '{}' but resolves to '{}'",
                partname, declared, resolved
            ),
            IntegrityViolation::DanglingRelationship {
                owner,
                r_id,
                target,
            } => write!(f, "{} of {} targets missing part {}", r_id, owner, target),
            IntegrityViolation::OrphanPart { partname } => {
                write!(f, "{} is not reachable from the package root", partname)
            },
        }
    }
}

struct ViolationList<'a>(&'a [IntegrityViolation]);

impl fmt::Display for ViolationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_error_lists_every_violation() {
        let err = OpcError::PackageIntegrity(vec![
            IntegrityViolation::DanglingRelationship {
                owner: "/word/document.xml".to_string(),
                r_id: "rId7".to_string(),
                target: "/word/missing.xml".to_string(),
            },
            IntegrityViolation::UntypedPart {
                partname: "/data.bin".to_string(),
            },
        ]);

        let msg = err.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("rId7"));
        assert!(msg.contains("/data.bin has no content type"));
    }

    #[test]
    fn test_part_in_use_message() {
        let err = OpcError::PartInUse {
            partname: "/word/styles.xml".to_string(),
            referenced_by: vec!["/word/document.xml".to_string(), "/".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Part /word/styles.xml is still referenced by /word/document.xml, /"
        );
    }
}
