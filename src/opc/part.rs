use crate::opc::content_types::{ContentType, PayloadKind};
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{PartName, RelsOwner};
use crate::opc::rel::{RelTarget, Relationships};
use crate::opc::xml::XmlDocument;
/// Package parts and their payloads.
///
/// A [`Part`] owns its content and, optionally, the relationships it
/// originates. The payload is a closed set of representations: the payload
/// family of a part is fixed by its content type when the part is created.
use std::borrow::Cow;

/// Content of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Parsed XML element tree
    Xml(XmlDocument),
    /// Opaque bytes, written back untouched
    Binary(Vec<u8>),
}

impl Payload {
    #[inline]
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Xml(_) => PayloadKind::Xml,
            Payload::Binary(_) => PayloadKind::Binary,
        }
    }

    /// Deserialize stored bytes into the payload family `kind`.
    ///
    /// # Errors
    /// Returns an XML error if an XML payload is not well-formed.
    pub fn from_bytes(kind: PayloadKind, bytes: Vec<u8>) -> Result<Self> {
        match kind {
            PayloadKind::Xml => Ok(Payload::Xml(XmlDocument::parse(&bytes)?)),
            PayloadKind::Binary => Ok(Payload::Binary(bytes)),
        }
    }

    /// Serialized bytes of this payload.
    pub fn to_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Payload::Xml(doc) => Cow::Owned(doc.to_bytes()),
            Payload::Binary(bytes) => Cow::Borrowed(bytes),
        }
    }
}

impl From<XmlDocument> for Payload {
    fn from(doc: XmlDocument) -> Self {
        Payload::Xml(doc)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// A part of an OPC package.
///
/// The relationships of a part are created lazily: a part that never
/// relates to anything has no relationships part and none is written.
#[derive(Debug, Clone)]
pub struct Part {
    partname: PartName,
    content_type: ContentType,
    payload: Payload,
    rels: Option<Relationships>,
}

impl Part {
    /// Create a part from an already-built payload.
    ///
    /// # Errors
    /// Returns [`OpcError::PayloadKindMismatch`] if the payload family does
    /// not match the one implied by `content_type`.
    pub fn new<C: Into<ContentType>>(
        partname: PartName,
        content_type: C,
        payload: Payload,
    ) -> Result<Self> {
        let content_type = content_type.into();
        check_kind(&partname, &content_type, &payload)?;
        Ok(Self {
            partname,
            content_type,
            payload,
            rels: None,
        })
    }

    /// Create a part by deserializing stored bytes according to the content type.
    ///
    /// # Errors
    /// Returns [`OpcError::PartLoad`] if the bytes cannot be decoded as the
    /// payload family the content type calls for.
    pub fn load<C: Into<ContentType>>(
        partname: PartName,
        content_type: C,
        blob: Vec<u8>,
    ) -> Result<Self> {
        let content_type = content_type.into();
        let payload =
            Payload::from_bytes(content_type.kind(), blob).map_err(|e| OpcError::PartLoad {
                partname: partname.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            partname,
            content_type,
            payload,
            rels: None,
        })
    }

    #[inline]
    pub fn partname(&self) -> &PartName {
        &self.partname
    }

    #[inline]
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replace the payload, keeping the content type.
    ///
    /// # Errors
    /// Returns [`OpcError::PayloadKindMismatch`] if the new payload is of the
    /// wrong family; the part is left unchanged.
    pub fn set_payload(&mut self, payload: Payload) -> Result<()> {
        check_kind(&self.partname, &self.content_type, &payload)?;
        self.payload = payload;
        Ok(())
    }

    /// The XML tree of an XML part.
    pub fn xml(&self) -> Option<&XmlDocument> {
        match &self.payload {
            Payload::Xml(doc) => Some(doc),
            Payload::Binary(_) => None,
        }
    }

    pub fn xml_mut(&mut self) -> Option<&mut XmlDocument> {
        match &mut self.payload {
            Payload::Xml(doc) => Some(doc),
            Payload::Binary(_) => None,
        }
    }

    /// Serialized content of this part.
    #[inline]
    pub fn blob(&self) -> Cow<'_, [u8]> {
        self.payload.to_bytes()
    }

    /// Outgoing relationships, if this part has any relationships part.
    #[inline]
    pub fn rels(&self) -> Option<&Relationships> {
        self.rels.as_ref()
    }

    /// Outgoing relationships, creating an empty set on first use.
    pub fn rels_mut(&mut self) -> &mut Relationships {
        let owner = &self.partname;
        self.rels
            .get_or_insert_with(|| Relationships::new(RelsOwner::from(owner)))
    }

    pub(crate) fn rels_mut_if_present(&mut self) -> Option<&mut Relationships> {
        self.rels.as_mut()
    }

    pub(crate) fn set_rels(&mut self, rels: Relationships) {
        self.rels = Some(rels);
    }

    /// Relate this part to `target`, reusing an equal relationship if present.
    ///
    /// Returns the relationship id. The target is not checked against the
    /// package here; dangling targets are reported when the package is saved.
    pub fn relate_to(&mut self, target: &PartName, reltype: &str) -> String {
        self.rels_mut().get_or_add(reltype, target).r_id().to_string()
    }

    /// Relate this part to an external resource, returning the relationship id.
    pub fn relate_to_ext(&mut self, url: &str, reltype: &str) -> String {
        self.rels_mut().get_or_add_ext_rel(reltype, url)
    }

    /// Resolve one of this part's relationship ids.
    ///
    /// # Errors
    /// Returns [`OpcError::DanglingRelationship`] if the id is unknown.
    pub fn resolve(&self, r_id: &str) -> Result<&RelTarget> {
        match &self.rels {
            Some(rels) => rels.resolve(r_id),
            None => Err(OpcError::DanglingRelationship {
                owner: self.partname.to_string(),
                r_id: r_id.to_string(),
            }),
        }
    }

    /// The target reference, as serialized, of a relationship id.
    pub fn target_ref(&self, r_id: &str) -> Result<&str> {
        self.rels
            .as_ref()
            .and_then(|rels| rels.get(r_id))
            .map(|rel| rel.target_ref())
            .ok_or_else(|| OpcError::RelationshipNotFound(format!("rId: {}", r_id)))
    }
}

fn check_kind(partname: &PartName, content_type: &ContentType, payload: &Payload) -> Result<()> {
    if payload.kind() != content_type.kind() {
        return Err(OpcError::PayloadKindMismatch {
            partname: partname.to_string(),
            content_type: content_type.to_string(),
            expected: content_type.kind().as_str(),
            actual: payload.kind().as_str(),
        });
    }
    Ok(())
}
