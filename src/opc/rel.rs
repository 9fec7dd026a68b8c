use crate::common::xml::escape_xml;
use crate::opc::constants::namespace;
use crate::opc::error::{OpcError, Result};
use crate::opc::packuri::{PartName, RelsOwner};
/// Relationship-related objects for OPC packages.
///
/// This module provides types for managing relationships between parts in an OPC package,
/// including internal and external relationships.
use std::fmt;

/// Where a relationship points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelTarget {
    /// Another part in the same package
    Internal(PartName),
    /// An opaque URI outside the package, never checked against the part mapping
    External(String),
}

impl RelTarget {
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, RelTarget::External(_))
    }

    /// The target part name, or None for external targets.
    pub fn partname(&self) -> Option<&PartName> {
        match self {
            RelTarget::Internal(partname) => Some(partname),
            RelTarget::External(_) => None,
        }
    }
}

impl fmt::Display for RelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelTarget::Internal(partname) => write!(f, "{}", partname),
            RelTarget::External(url) => f.write_str(url),
        }
    }
}

impl From<PartName> for RelTarget {
    fn from(partname: PartName) -> Self {
        RelTarget::Internal(partname)
    }
}

/// A single relationship from a source to a target.
///
/// Represents a connection between parts in an OPC package, identified by an rId
/// (relationship ID). Can be either internal (pointing to another part) or external
/// (pointing to an external URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1", "rId2")
    r_id: String,

    /// Relationship type URI
    reltype: String,

    /// Resolved target
    target: RelTarget,

    /// Target reference as serialized in the .rels XML
    target_ref: String,
}

impl Relationship {
    /// Create an internal relationship, serializing the target relative to `base_uri`.
    pub fn internal(r_id: String, reltype: String, target: PartName, base_uri: &str) -> Self {
        let target_ref = target.relative_ref(base_uri);
        Self {
            r_id,
            reltype,
            target: RelTarget::Internal(target),
            target_ref,
        }
    }

    /// Create an external relationship.
    pub fn external(r_id: String, reltype: String, url: String) -> Self {
        Self {
            r_id,
            reltype,
            target_ref: url.clone(),
            target: RelTarget::External(url),
        }
    }

    /// Rebuild a relationship from its serialized attributes.
    ///
    /// The target reference is kept verbatim so it is written back unchanged.
    ///
    /// # Errors
    /// Returns [`OpcError::InvalidRelationship`] if an internal target does not
    /// resolve to a valid part name.
    pub fn from_serialized(
        r_id: String,
        reltype: String,
        target_ref: String,
        base_uri: &str,
        is_external: bool,
    ) -> Result<Self> {
        let target = if is_external {
            RelTarget::External(target_ref.clone())
        } else {
            // Fragments and queries are not part of the target part name
            let path = target_ref
                .split(['#', '?'])
                .next()
                .unwrap_or(target_ref.as_str());
            let partname = PartName::from_rel_ref(base_uri, path).map_err(|e| {
                OpcError::InvalidRelationship(format!("{} target '{}': {}", r_id, target_ref, e))
            })?;
            RelTarget::Internal(partname)
        };

        Ok(Self {
            r_id,
            reltype,
            target,
            target_ref,
        })
    }

    /// Get the relationship ID.
    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    /// Get the relationship type.
    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    #[inline]
    pub fn target(&self) -> &RelTarget {
        &self.target
    }

    /// Get the target reference.
    ///
    /// For internal relationships, this is a relative part reference.
    /// For external relationships, this is an absolute URL.
    #[inline]
    pub fn target_ref(&self) -> &str {
        &self.target_ref
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target.is_external()
    }

    /// Get the absolute target partname for internal relationships.
    ///
    /// Returns an error if this is an external relationship.
    pub fn target_partname(&self) -> Result<&PartName> {
        self.target.partname().ok_or_else(|| {
            OpcError::InvalidRelationship(format!(
                "Cannot get target_partname for external relationship {}",
                self.r_id
            ))
        })
    }
}

/// The relationships part of one owner: the package root or a single part.
///
/// Relationships keep their insertion (load) order. New ids are minted from a
/// counter that only moves forward, so an id freed by a removal is never
/// handed out again during the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationships {
    /// The entity these relationships originate from
    owner: RelsOwner,

    /// Relationships in insertion order
    rels: Vec<Relationship>,

    /// Numeric suffix of the next minted rId. Loaded ids are parsed as u32,
    /// so the counter can always move past the highest one.
    next_id: u64,
}

impl Relationships {
    /// Create a new empty relationships collection for `owner`.
    pub fn new(owner: RelsOwner) -> Self {
        Self {
            owner,
            rels: Vec::new(),
            next_id: 1,
        }
    }

    #[inline]
    pub fn owner(&self) -> &RelsOwner {
        &self.owner
    }

    /// Base URI for resolving relative references
    #[inline]
    pub fn base_uri(&self) -> &str {
        self.owner.base_uri()
    }

    /// Add a relationship with a freshly minted id, returning the id.
    pub fn add_relationship(&mut self, reltype: &str, target: RelTarget) -> String {
        let r_id = self.next_r_id();
        let rel = match target {
            RelTarget::Internal(partname) => {
                Relationship::internal(r_id.clone(), reltype.to_string(), partname, self.base_uri())
            },
            RelTarget::External(url) => Relationship::external(r_id.clone(), reltype.to_string(), url),
        };
        self.rels.push(rel);
        r_id
    }

    /// Insert a relationship that already carries an id (e.g. one read from a .rels part).
    ///
    /// # Errors
    /// Returns [`OpcError::InvalidRelationship`] if the id is already used in
    /// this collection; the collection is left unchanged.
    pub fn insert(&mut self, rel: Relationship) -> Result<()> {
        if self.get(rel.r_id()).is_some() {
            return Err(OpcError::InvalidRelationship(format!(
                "duplicate relationship id '{}' in {}",
                rel.r_id(),
                self.owner
            )));
        }
        if let Some(n) = Self::id_number(rel.r_id()) {
            self.next_id = self.next_id.max(u64::from(n) + 1);
        }
        self.rels.push(rel);
        Ok(())
    }

    /// Get a relationship by its ID.
    #[inline]
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|rel| rel.r_id() == r_id)
    }

    /// Resolve a relationship id to its target.
    ///
    /// # Errors
    /// Returns [`OpcError::DanglingRelationship`] if the id is absent.
    pub fn resolve(&self, r_id: &str) -> Result<&RelTarget> {
        self.get(r_id)
            .map(Relationship::target)
            .ok_or_else(|| OpcError::DanglingRelationship {
                owner: self.owner.to_string(),
                r_id: r_id.to_string(),
            })
    }

    /// Get or add a relationship to a target part.
    ///
    /// If a relationship of the given type to the target already exists,
    /// returns that relationship. Otherwise, creates a new one with the
    /// next available rId.
    pub fn get_or_add(&mut self, reltype: &str, target: &PartName) -> &Relationship {
        let existing = self.rels.iter().position(|rel| {
            rel.reltype() == reltype && rel.target().partname() == Some(target)
        });

        let idx = match existing {
            Some(idx) => idx,
            None => {
                self.add_relationship(reltype, RelTarget::Internal(target.clone()));
                self.rels.len() - 1
            },
        };
        &self.rels[idx]
    }

    /// Get or add an external relationship, returning its rId.
    ///
    /// Similar to `get_or_add` but for external relationships.
    pub fn get_or_add_ext_rel(&mut self, reltype: &str, target_ref: &str) -> String {
        for rel in &self.rels {
            if rel.reltype() == reltype && rel.is_external() && rel.target_ref() == target_ref {
                return rel.r_id().to_string();
            }
        }

        self.add_relationship(reltype, RelTarget::External(target_ref.to_string()))
    }

    /// Mint the next relationship ID.
    ///
    /// Generates IDs in the format "rId1", "rId2", etc. Never reuses a number
    /// once handed out or seen in loaded data.
    fn next_r_id(&mut self) -> String {
        loop {
            let candidate = format!("rId{}", self.next_id);
            self.next_id += 1;
            if self.get(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Extract the number from an "rId123" style id using fast integer parsing.
    fn id_number(r_id: &str) -> Option<u32> {
        r_id.strip_prefix("rId")
            .and_then(|digits| atoi_simd::parse::<u32, false, false>(digits.as_bytes()).ok())
    }

    /// Iterate over relationships of a given type, in insertion order.
    pub fn by_reltype<'a, 'b>(
        &'a self,
        reltype: &'b str,
    ) -> impl Iterator<Item = &'a Relationship> + use<'a, 'b> {
        self.rels.iter().filter(move |rel| rel.reltype() == reltype)
    }

    /// Get the single relationship of a specific type.
    ///
    /// Returns an error if no relationship of the type is found,
    /// or if multiple relationships of the type exist.
    pub fn single_with_reltype(&self, reltype: &str) -> Result<&Relationship> {
        let mut matching = self.by_reltype(reltype);

        match (matching.next(), matching.next()) {
            (None, _) => Err(OpcError::RelationshipNotFound(format!(
                "No relationship of type '{}' from {}",
                reltype, self.owner
            ))),
            (Some(rel), None) => Ok(rel),
            (Some(_), Some(_)) => Err(OpcError::AmbiguousRelationship {
                owner: self.owner.to_string(),
                reltype: reltype.to_string(),
            }),
        }
    }

    /// Get an iterator over all relationships.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.rels.iter()
    }

    /// Iterate over the part names targeted by internal relationships.
    pub fn internal_targets(&self) -> impl Iterator<Item = &PartName> {
        self.rels.iter().filter_map(|rel| rel.target().partname())
    }

    /// Get the number of relationships in the collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    /// Check if the collection is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Remove a relationship by its ID.
    pub fn remove(&mut self, r_id: &str) -> Option<Relationship> {
        let idx = self.rels.iter().position(|rel| rel.r_id() == r_id)?;
        Some(self.rels.remove(idx))
    }

    /// Remove every internal relationship pointing at `target`.
    pub fn remove_targeting(&mut self, target: &PartName) -> Vec<Relationship> {
        let mut removed = Vec::new();
        self.rels.retain(|rel| {
            if rel.target().partname() == Some(target) {
                removed.push(rel.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Check whether any internal relationship points at `target`.
    pub fn targets(&self, target: &PartName) -> bool {
        self.internal_targets().any(|t| t == target)
    }

    /// Serialize relationships to XML format.
    ///
    /// Generates the XML for a .rels file, in insertion order.
    pub fn to_xml(&self) -> String {
        let mut xml = String::with_capacity(256 + self.rels.len() * 160);

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        xml.push('\n');
        xml.push_str(&format!(r#"<Relationships xmlns="{}">"#, namespace::OPC_RELATIONSHIPS));
        xml.push('\n');

        for rel in &self.rels {
            let target_mode = if rel.is_external() {
                r#" TargetMode="External""#
            } else {
                ""
            };

            xml.push_str(&format!(
                r#"  <Relationship Id="{}" Type="{}" Target="{}"{}/>"#,
                escape_xml(rel.r_id()),
                escape_xml(rel.reltype()),
                escape_xml(rel.target_ref()),
                target_mode
            ));
            xml.push('\n');
        }

        xml.push_str("</Relationships>");

        xml
    }
}

impl Default for Relationships {
    fn default() -> Self {
        Self::new(RelsOwner::Package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pn(s: &str) -> PartName {
        PartName::new(s).unwrap()
    }

    fn word_rels() -> Relationships {
        Relationships::new(RelsOwner::Part(pn("/word/document.xml")))
    }

    #[test]
    fn test_relationship_creation() {
        let rel = Relationship::internal(
            "rId1".to_string(),
            "http://example.com/rel".to_string(),
            pn("/word/styles.xml"),
            "/word",
        );

        assert_eq!(rel.r_id(), "rId1");
        assert_eq!(rel.reltype(), "http://example.com/rel");
        assert_eq!(rel.target_ref(), "styles.xml");
        assert!(!rel.is_external());
        assert_eq!(rel.target_partname().unwrap(), &pn("/word/styles.xml"));
    }

    #[test]
    fn test_from_serialized() {
        let rel = Relationship::from_serialized(
            "rId3".to_string(),
            "t".to_string(),
            "../customXml/item1.xml".to_string(),
            "/word",
            false,
        )
        .unwrap();
        assert_eq!(rel.target_partname().unwrap(), &pn("/customXml/item1.xml"));
        assert_eq!(rel.target_ref(), "../customXml/item1.xml");

        let ext = Relationship::from_serialized(
            "rId4".to_string(),
            "t".to_string(),
            "https://example.com/?q=1".to_string(),
            "/word",
            true,
        )
        .unwrap();
        assert!(ext.is_external());
        assert!(ext.target_partname().is_err());

        assert!(Relationship::from_serialized(
            "rId5".to_string(),
            "t".to_string(),
            "media/bad[1].png".to_string(),
            "/word",
            false,
        )
        .is_err());
    }

    #[test]
    fn test_next_r_id() {
        let mut rels = word_rels();

        let r_id1 = rels.add_relationship("type1", RelTarget::Internal(pn("/word/a.xml")));
        assert_eq!(r_id1, "rId1");

        let r_id2 = rels.add_relationship("type1", RelTarget::Internal(pn("/word/b.xml")));
        assert_eq!(r_id2, "rId2");
    }

    #[test]
    fn test_ids_never_reused_after_removal() {
        let mut rels = word_rels();
        rels.add_relationship("t", RelTarget::Internal(pn("/word/a.xml")));
        let r2 = rels.add_relationship("t", RelTarget::Internal(pn("/word/b.xml")));
        rels.remove(&r2);

        let r3 = rels.add_relationship("t", RelTarget::Internal(pn("/word/c.xml")));
        assert_eq!(r3, "rId3");
    }

    #[test]
    fn test_insert_advances_counter() {
        let mut rels = word_rels();
        rels.insert(
            Relationship::from_serialized(
                "rId9".to_string(),
                "t".to_string(),
                "a.xml".to_string(),
                "/word",
                false,
            )
            .unwrap(),
        )
        .unwrap();

        let next = rels.add_relationship("t", RelTarget::External("http://x".to_string()));
        assert_eq!(next, "rId10");

        let dup = Relationship::external("rId9".to_string(), "t".to_string(), "u".to_string());
        assert!(matches!(rels.insert(dup), Err(OpcError::InvalidRelationship(_))));
        assert_eq!(rels.len(), 2);
    }

    #[test]
    fn test_insert_tolerates_odd_ids() {
        let mut rels = word_rels();
        for id in ["a€", "rId€1", "rId", "rId99999999999"] {
            rels.insert(Relationship::external(id.to_string(), "t".to_string(), "u".to_string()))
                .unwrap();
        }

        let next = rels.add_relationship("t", RelTarget::External("x".to_string()));
        assert_eq!(next, "rId1");
    }

    #[test]
    fn test_mint_after_highest_loaded_id() {
        let mut rels = word_rels();
        let max = format!("rId{}", u32::MAX);
        rels.insert(Relationship::external(max.clone(), "t".to_string(), "u".to_string()))
            .unwrap();

        let next = rels.add_relationship("t", RelTarget::External("x".to_string()));
        assert_eq!(next, "rId4294967296");
        let after = rels.add_relationship("t", RelTarget::External("y".to_string()));
        assert_eq!(after, "rId4294967297");
        assert!(rels.get(&max).is_some());
    }

    #[test]
    fn test_by_reltype_outlives_the_type_argument() {
        let mut rels = word_rels();
        rels.add_relationship("styles", RelTarget::Internal(pn("/word/styles.xml")));

        let found = {
            let reltype = String::from("styles");
            rels.single_with_reltype(&reltype).unwrap()
        };
        assert_eq!(found.target_ref(), "styles.xml");
    }

    #[test]
    fn test_get_or_add() {
        let mut rels = word_rels();

        let rel1 = rels.get_or_add("type1", &pn("/word/target1.xml"));
        assert_eq!(rel1.r_id(), "rId1");

        // Getting the same relationship should return the same rId
        let rel2 = rels.get_or_add("type1", &pn("/word/target1.xml"));
        assert_eq!(rel2.r_id(), "rId1");

        // Different target should create new relationship
        let rel3 = rels.get_or_add("type1", &pn("/word/target2.xml"));
        assert_eq!(rel3.r_id(), "rId2");

        let ext1 = rels.get_or_add_ext_rel("link", "https://example.com");
        let ext2 = rels.get_or_add_ext_rel("link", "https://example.com");
        assert_eq!(ext1, ext2);
        assert_eq!(rels.len(), 3);
    }

    #[test]
    fn test_resolve_dangling() {
        let rels = word_rels();
        assert!(matches!(
            rels.resolve("rId42"),
            Err(OpcError::DanglingRelationship { r_id, .. }) if r_id == "rId42"
        ));
    }

    #[test]
    fn test_single_with_reltype() {
        let mut rels = Relationships::new(RelsOwner::Package);
        assert!(matches!(
            rels.single_with_reltype("main"),
            Err(OpcError::RelationshipNotFound(_))
        ));

        rels.add_relationship("main", RelTarget::Internal(pn("/a.xml")));
        assert_eq!(rels.single_with_reltype("main").unwrap().r_id(), "rId1");

        rels.add_relationship("main", RelTarget::Internal(pn("/b.xml")));
        assert!(matches!(
            rels.single_with_reltype("main"),
            Err(OpcError::AmbiguousRelationship { .. })
        ));
    }

    #[test]
    fn test_remove_targeting() {
        let mut rels = word_rels();
        rels.add_relationship("t", RelTarget::Internal(pn("/word/a.xml")));
        rels.add_relationship("u", RelTarget::Internal(pn("/word/a.xml")));
        rels.add_relationship("t", RelTarget::Internal(pn("/word/b.xml")));

        let removed = rels.remove_targeting(&pn("/word/a.xml"));
        assert_eq!(removed.len(), 2);
        assert_eq!(rels.len(), 1);
        assert!(!rels.targets(&pn("/word/a.xml")));
        assert!(rels.targets(&pn("/word/b.xml")));
    }

    #[test]
    fn test_to_xml() {
        let mut rels = word_rels();
        rels.add_relationship("http://t/styles", RelTarget::Internal(pn("/word/styles.xml")));
        rels.add_relationship(
            "http://t/hyperlink",
            RelTarget::External("https://example.com/?a=1&b=2".to_string()),
        );

        let xml = rels.to_xml();
        assert!(xml.contains(r#"<Relationship Id="rId1" Type="http://t/styles" Target="styles.xml"/>"#));
        assert!(xml.contains(r#"Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>"#));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Add), (0usize..16).prop_map(Op::Remove)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ids_unique_under_churn(ops in prop::collection::vec(op(), 1..64)) {
            let mut rels = word_rels();
            let mut minted = std::collections::HashSet::new();

            for op in ops {
                match op {
                    Op::Add => {
                        let id = rels.add_relationship("t", RelTarget::External("x".to_string()));
                        // Never handed out twice in the session
                        prop_assert!(minted.insert(id));
                    },
                    Op::Remove(i) => {
                        let id = rels.iter().nth(i).map(|r| r.r_id().to_string());
                        if let Some(id) = id {
                            rels.remove(&id);
                        }
                    },
                }

                let mut seen = std::collections::HashSet::new();
                for rel in rels.iter() {
                    prop_assert!(seen.insert(rel.r_id().to_string()));
                }
            }
        }
    }
}
