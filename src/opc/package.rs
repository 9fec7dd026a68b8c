/// The in-memory package graph.
///
/// [`OpcPackage`] owns every part, the package-level relationships and the
/// content type registry. Adding a part under an owner together with a
/// relationship of a given type is the graph-building primitive; well-known
/// singleton parts are found by walking relationships on demand rather than
/// being cached.
use crate::opc::constants::relationship_type;
use crate::opc::content_types::ContentTypeMap;
use crate::opc::error::{IntegrityViolation, OpcError, Result};
use crate::opc::packuri::{PartName, RelsOwner};
use crate::opc::part::Part;
use crate::opc::pkgreader::PackageReader;
use crate::opc::pkgwriter::PackageWriter;
use crate::opc::rel::{RelTarget, Relationship, Relationships};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Seek, Write};
use std::path::Path;
use tracing::debug;

/// What to do with incoming relationships when a part is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Refuse to remove a part that another owner still relates to
    #[default]
    Reject,
    /// Delete every relationship pointing at the part along with it
    Cascade,
}

/// Main API class for working with OPC packages.
///
/// Not safe for unsynchronized concurrent mutation; relationship id minting
/// and part name uniqueness are check-then-act.
#[derive(Debug, Clone)]
pub struct OpcPackage {
    /// Package-level relationships
    rels: Relationships,

    /// All parts in the package, indexed by partname
    parts: HashMap<PartName, Part>,

    content_types: ContentTypeMap,
}

impl OpcPackage {
    /// Create a new empty OPC package with the standard `rels` and `xml` defaults.
    pub fn new() -> Self {
        Self {
            rels: Relationships::new(RelsOwner::Package),
            parts: HashMap::new(),
            content_types: ContentTypeMap::with_standard_defaults(),
        }
    }

    pub(crate) fn from_loaded(
        rels: Relationships,
        parts: HashMap<PartName, Part>,
        content_types: ContentTypeMap,
    ) -> Self {
        Self {
            rels,
            parts,
            content_types,
        }
    }

    /// Open an OPC package from a file with default load options.
    ///
    /// Load warnings are logged; use [`PackageReader`] to inspect them.
    ///
    /// # Example
    /// ```no_run
    /// use litchi_opc::opc::OpcPackage;
    ///
    /// let pkg = OpcPackage::open("document.docx").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(PackageReader::default().open(path)?.package)
    }

    /// Load an OPC package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Ok(PackageReader::default().load_reader(reader)?.package)
    }

    /// Load an OPC package from archive bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(PackageReader::default().load_bytes(bytes)?.package)
    }

    /// Validate and save to `path`, replacing it atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        PackageWriter::default().write(path, self)
    }

    /// Validate and serialize to archive bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        PackageWriter::default().to_bytes(self)
    }

    /// Validate and write to any seekable sink, returning the sink.
    pub fn write_to_stream<W: Write + Seek>(&self, writer: W) -> Result<W> {
        PackageWriter::default().write_to_stream(writer, self)
    }

    /// Add `part` and relate it from `owner` with a new relationship of `reltype`.
    ///
    /// Registers the part's content type (as an Override unless the extension
    /// Default already gives the same type) and returns the new relationship id.
    ///
    /// # Errors
    /// - [`OpcError::DuplicatePartName`] if the part name is taken
    /// - [`OpcError::PartNotFound`] if `owner` is a part not in the package
    /// - [`OpcError::InvalidPartName`] if the name addresses a relationships part
    ///
    /// The package is unchanged on error.
    pub fn add_part(&mut self, part: Part, owner: &RelsOwner, reltype: &str) -> Result<String> {
        let partname = part.partname().clone();
        if self.parts.contains_key(&partname) {
            return Err(OpcError::DuplicatePartName(partname.to_string()));
        }
        if partname.is_rels_part() {
            return Err(OpcError::InvalidPartName {
                name: partname.to_string(),
                reason: "relationships parts are derived from their owner",
            });
        }
        self.check_owner(owner)?;

        self.content_types
            .register_part(&partname, part.content_type());
        self.parts.insert(partname.clone(), part);
        let r_id = self
            .owner_rels_mut(owner)?
            .add_relationship(reltype, RelTarget::Internal(partname.clone()));

        debug!(partname = %partname, owner = %owner, r_id = %r_id, "added part");
        Ok(r_id)
    }

    /// Insert a part that existing relationships already point at.
    pub(crate) fn attach_part(&mut self, part: Part) -> Result<()> {
        let partname = part.partname().clone();
        if self.parts.contains_key(&partname) {
            return Err(OpcError::DuplicatePartName(partname.to_string()));
        }
        self.content_types
            .register_part(&partname, part.content_type());
        self.parts.insert(partname.clone(), part);
        debug!(partname = %partname, "attached part");
        Ok(())
    }

    /// Add a relationship from `owner` with a freshly minted id.
    ///
    /// Internal targets are not checked here; a target missing at save time
    /// is reported by [`OpcPackage::validate`].
    pub fn add_relationship(
        &mut self,
        owner: &RelsOwner,
        reltype: &str,
        target: RelTarget,
    ) -> Result<String> {
        let rels = self.owner_rels_mut(owner)?;
        let r_id = rels.add_relationship(reltype, target);
        debug!(owner = %owner, r_id = %r_id, reltype, "added relationship");
        Ok(r_id)
    }

    /// Remove one relationship. Its id is not reused for this owner.
    pub fn remove_relationship(&mut self, owner: &RelsOwner, r_id: &str) -> Result<Relationship> {
        let rels = match owner {
            RelsOwner::Package => Some(&mut self.rels),
            RelsOwner::Part(partname) => self
                .parts
                .get_mut(partname)
                .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?
                .rels_mut_if_present(),
        };

        let removed = rels
            .and_then(|rels| rels.remove(r_id))
            .ok_or_else(|| OpcError::RelationshipNotFound(format!("{} from {}", r_id, owner)))?;
        debug!(owner = %owner, r_id, "removed relationship");
        Ok(removed)
    }

    /// Resolve a relationship id of `owner` to its target.
    ///
    /// # Errors
    /// Returns [`OpcError::DanglingRelationship`] if the owner has no such id.
    pub fn resolve_relationship(&self, owner: &RelsOwner, r_id: &str) -> Result<&RelTarget> {
        self.check_owner(owner)?;
        match self.owner_rels(owner) {
            Some(rels) => rels.resolve(r_id),
            None => Err(OpcError::DanglingRelationship {
                owner: owner.to_string(),
                r_id: r_id.to_string(),
            }),
        }
    }

    /// The part an internal relationship of `owner` points at.
    pub fn related_part(&self, owner: &RelsOwner, r_id: &str) -> Result<&Part> {
        let target = self.resolve_relationship(owner, r_id)?;
        self.target_part(owner, r_id, target)
    }

    /// The single part related from `owner` by `reltype`.
    ///
    /// # Errors
    /// - [`OpcError::RelationshipNotFound`] if there is no such relationship
    /// - [`OpcError::AmbiguousRelationship`] if there is more than one
    /// - [`OpcError::InvalidRelationship`] if it is external
    /// - [`OpcError::DanglingRelationship`] if its target part is missing
    pub fn part_by_reltype(&self, owner: &RelsOwner, reltype: &str) -> Result<&Part> {
        self.check_owner(owner)?;
        let rel = match self.owner_rels(owner) {
            Some(rels) => rels.single_with_reltype(reltype)?,
            None => {
                return Err(OpcError::RelationshipNotFound(format!(
                    "No relationship of type '{}' from {}",
                    reltype, owner
                )));
            },
        };
        self.target_part(owner, rel.r_id(), rel.target())
    }

    /// Get a reference to the main document part.
    ///
    /// For Word documents, this is the document.xml part.
    pub fn main_document_part(&self) -> Result<&Part> {
        self.part_by_reltype(&RelsOwner::Package, relationship_type::OFFICE_DOCUMENT)
    }

    pub fn get_part(&self, partname: &PartName) -> Result<&Part> {
        self.parts
            .get(partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))
    }

    pub fn get_part_mut(&mut self, partname: &PartName) -> Result<&mut Part> {
        self.parts
            .get_mut(partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))
    }

    #[inline]
    pub fn contains_part(&self, partname: &PartName) -> bool {
        self.parts.contains_key(partname)
    }

    /// Iterate over all parts, ordered by part name.
    pub fn iter_parts(&self) -> impl Iterator<Item = &Part> {
        let mut parts: Vec<&Part> = self.parts.values().collect();
        parts.sort_unstable_by(|a, b| a.partname().cmp(b.partname()));
        parts.into_iter()
    }

    #[inline]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Package-level relationships.
    #[inline]
    pub fn rels(&self) -> &Relationships {
        &self.rels
    }

    /// The relationships of `owner`, if it exists and has any relationships part.
    pub fn owner_rels(&self, owner: &RelsOwner) -> Option<&Relationships> {
        match owner {
            RelsOwner::Package => Some(&self.rels),
            RelsOwner::Part(partname) => self.parts.get(partname).and_then(Part::rels),
        }
    }

    #[inline]
    pub fn content_types(&self) -> &ContentTypeMap {
        &self.content_types
    }

    /// Direct access to the registry. Changes that stop a part's type from
    /// resolving are reported by [`OpcPackage::validate`].
    #[inline]
    pub fn content_types_mut(&mut self) -> &mut ContentTypeMap {
        &mut self.content_types
    }

    /// Part names reachable from the package root, in breadth-first order.
    ///
    /// External relationships and missing targets are skipped.
    pub fn reachable_parts(&self) -> Vec<&PartName> {
        let mut seen: HashSet<&PartName> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&PartName> = self.rels.internal_targets().collect();

        while let Some(partname) = queue.pop_front() {
            let Some((key, part)) = self.parts.get_key_value(partname) else {
                continue;
            };
            if !seen.insert(key) {
                continue;
            }
            order.push(key);
            if let Some(rels) = part.rels() {
                queue.extend(rels.internal_targets());
            }
        }

        order
    }

    /// Remove a part together with its own relationships and content type Override.
    ///
    /// With [`RemovalPolicy::Reject`] the removal fails with
    /// [`OpcError::PartInUse`] while any other owner still relates to the
    /// part. With [`RemovalPolicy::Cascade`] those relationships are deleted.
    /// Parts the removed part related to are left in place; if nothing else
    /// reaches them they become orphans, which save validation reports.
    pub fn remove_part(&mut self, partname: &PartName, policy: RemovalPolicy) -> Result<Part> {
        if !self.parts.contains_key(partname) {
            return Err(OpcError::PartNotFound(partname.to_string()));
        }

        let referencing = self.referencing_owners(partname);
        if policy == RemovalPolicy::Reject && !referencing.is_empty() {
            return Err(OpcError::PartInUse {
                partname: partname.to_string(),
                referenced_by: referencing.iter().map(ToString::to_string).collect(),
            });
        }

        for owner in &referencing {
            let rels = match owner {
                RelsOwner::Package => Some(&mut self.rels),
                RelsOwner::Part(name) => self
                    .parts
                    .get_mut(name)
                    .and_then(Part::rels_mut_if_present),
            };
            if let Some(rels) = rels {
                let removed = rels.remove_targeting(partname);
                debug!(owner = %owner, count = removed.len(), "removed incoming relationships");
            }
        }

        self.content_types.remove_override(partname);
        let part = self
            .parts
            .remove(partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?;
        debug!(partname = %partname, ?policy, "removed part");
        Ok(part)
    }

    /// Find the next available part name for a `%d` template.
    ///
    /// For example, `/word/media/image%d.png` gives `/word/media/image1.png`
    /// in an empty package, or the lowest unused number otherwise.
    pub fn next_partname(&self, template: &str) -> Result<PartName> {
        // One of the first len + 1 candidates is always free
        for n in 1..=self.parts.len() + 1 {
            let candidate = PartName::new(template.replace("%d", &n.to_string()))?;
            if !self.parts.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(OpcError::DuplicatePartName(template.to_string()))
    }

    /// Check the package can be saved.
    ///
    /// # Errors
    /// Returns [`OpcError::PackageIntegrity`] listing every violation found.
    pub fn validate(&self) -> Result<()> {
        let violations = self.integrity_violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(OpcError::PackageIntegrity(violations))
        }
    }

    /// Every integrity problem that would prevent a save, in a stable order.
    ///
    /// Untyped parts and type mismatches come first, then dangling internal
    /// relationships (package first, then by owner name), then orphans.
    pub fn integrity_violations(&self) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();

        for part in self.iter_parts() {
            let partname = part.partname();
            match self.content_types.resolve(partname) {
                Err(_) => violations.push(IntegrityViolation::UntypedPart {
                    partname: partname.to_string(),
                }),
                Ok(resolved) if resolved != part.content_type() => {
                    violations.push(IntegrityViolation::ContentTypeMismatch {
                        partname: partname.to_string(),
                        declared: part.content_type().to_string(),
                        resolved: resolved.to_string(),
                    });
                },
                Ok(_) => {},
            }
        }

        let owners = std::iter::once(&self.rels).chain(self.iter_parts().filter_map(Part::rels));
        for rels in owners {
            for rel in rels.iter() {
                if let RelTarget::Internal(target) = rel.target()
                    && !self.parts.contains_key(target)
                {
                    violations.push(IntegrityViolation::DanglingRelationship {
                        owner: rels.owner().to_string(),
                        r_id: rel.r_id().to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let reachable: HashSet<&PartName> = self.reachable_parts().into_iter().collect();
        for part in self.iter_parts() {
            if !reachable.contains(part.partname()) {
                violations.push(IntegrityViolation::OrphanPart {
                    partname: part.partname().to_string(),
                });
            }
        }

        violations
    }

    fn check_owner(&self, owner: &RelsOwner) -> Result<()> {
        match owner {
            RelsOwner::Part(partname) if !self.parts.contains_key(partname) => {
                Err(OpcError::PartNotFound(partname.to_string()))
            },
            _ => Ok(()),
        }
    }

    fn owner_rels_mut(&mut self, owner: &RelsOwner) -> Result<&mut Relationships> {
        match owner {
            RelsOwner::Package => Ok(&mut self.rels),
            RelsOwner::Part(partname) => self
                .parts
                .get_mut(partname)
                .map(Part::rels_mut)
                .ok_or_else(|| OpcError::PartNotFound(partname.to_string())),
        }
    }

    fn target_part(&self, owner: &RelsOwner, r_id: &str, target: &RelTarget) -> Result<&Part> {
        match target {
            RelTarget::External(url) => Err(OpcError::InvalidRelationship(format!(
                "{} from {} is external ({})",
                r_id, owner, url
            ))),
            RelTarget::Internal(partname) => {
                self.parts
                    .get(partname)
                    .ok_or_else(|| OpcError::DanglingRelationship {
                        owner: owner.to_string(),
                        r_id: r_id.to_string(),
                    })
            },
        }
    }

    /// Owners other than the part itself with a relationship to `partname`,
    /// package first, then parts by name.
    fn referencing_owners(&self, partname: &PartName) -> Vec<RelsOwner> {
        let mut owners = Vec::new();
        if self.rels.targets(partname) {
            owners.push(RelsOwner::Package);
        }
        for part in self.iter_parts() {
            if part.partname() != partname && part.rels().is_some_and(|rels| rels.targets(partname)) {
                owners.push(RelsOwner::from(part.partname()));
            }
        }
        owners
    }
}

impl Default for OpcPackage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opc::constants::{content_type as ct, relationship_type as rt};
    use crate::opc::part::Payload;
    use crate::opc::xml::XmlDocument;

    fn pn(s: &str) -> PartName {
        PartName::new(s).unwrap()
    }

    fn xml_part(name: &str, content_type: &str, xml: &str) -> Part {
        Part::load(pn(name), content_type, xml.as_bytes().to_vec()).unwrap()
    }

    fn minimal_package() -> OpcPackage {
        let mut pkg = OpcPackage::new();
        let doc = xml_part(
            "/word/document.xml",
            ct::WML_DOCUMENT_MAIN,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body/></w:document>"#,
        );
        pkg.add_part(doc, &RelsOwner::Package, rt::OFFICE_DOCUMENT)
            .unwrap();

        let styles = xml_part(
            "/word/styles.xml",
            ct::WML_STYLES,
            r#"<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"/>"#,
        );
        pkg.add_part(styles, &RelsOwner::from(pn("/word/document.xml")), rt::STYLES)
            .unwrap();
        pkg
    }

    #[test]
    fn test_add_part_and_lookup() {
        let pkg = minimal_package();
        assert_eq!(pkg.part_count(), 2);

        let main = pkg.main_document_part().unwrap();
        assert_eq!(main.partname().as_str(), "/word/document.xml");
        assert_eq!(main.content_type(), &ct::WML_DOCUMENT_MAIN);

        let styles = pkg
            .part_by_reltype(&RelsOwner::from(main.partname()), rt::STYLES)
            .unwrap();
        assert_eq!(styles.partname().as_str(), "/word/styles.xml");
        assert_eq!(
            pkg.content_types().resolve(styles.partname()).unwrap(),
            &ct::WML_STYLES
        );
        assert_eq!(
            main.rels().unwrap().get("rId1").unwrap().target_ref(),
            "styles.xml"
        );
    }

    #[test]
    fn test_duplicate_part_leaves_package_unchanged() {
        let mut pkg = minimal_package();
        let rels_before = pkg.rels().clone();
        let types_before = pkg.content_types().clone();

        let again = xml_part("/word/styles.xml", ct::XML, "<other/>");
        let err = pkg
            .add_part(again, &RelsOwner::Package, rt::STYLES)
            .unwrap_err();

        assert!(matches!(err, OpcError::DuplicatePartName(ref name) if name == "/word/styles.xml"));
        assert_eq!(pkg.part_count(), 2);
        assert_eq!(pkg.rels(), &rels_before);
        assert_eq!(pkg.content_types(), &types_before);
        assert_eq!(
            pkg.get_part(&pn("/word/styles.xml")).unwrap().content_type(),
            &ct::WML_STYLES
        );
    }

    #[test]
    fn test_add_part_unknown_owner() {
        let mut pkg = OpcPackage::new();
        let part = xml_part("/word/styles.xml", ct::WML_STYLES, "<styles/>");
        let err = pkg
            .add_part(part, &RelsOwner::from(pn("/word/document.xml")), rt::STYLES)
            .unwrap_err();
        assert!(matches!(err, OpcError::PartNotFound(_)));
        assert_eq!(pkg.part_count(), 0);
        assert!(pkg.content_types().overrides().next().is_none());
    }

    #[test]
    fn test_add_rels_part_is_rejected() {
        let mut pkg = OpcPackage::new();
        let part = xml_part("/word/_rels/document.xml.rels", ct::OPC_RELATIONSHIPS, "<r/>");
        let err = pkg
            .add_part(part, &RelsOwner::Package, rt::OFFICE_DOCUMENT)
            .unwrap_err();
        assert!(matches!(err, OpcError::InvalidPartName { .. }));
    }

    #[test]
    fn test_ambiguous_singleton() {
        let mut pkg = minimal_package();
        let doc = RelsOwner::from(pn("/word/document.xml"));
        let second = xml_part("/word/styles2.xml", ct::WML_STYLES, "<styles/>");
        pkg.add_part(second, &doc, rt::STYLES).unwrap();

        let err = pkg.part_by_reltype(&doc, rt::STYLES).unwrap_err();
        assert!(matches!(err, OpcError::AmbiguousRelationship { .. }));

        let err = pkg.part_by_reltype(&doc, rt::NUMBERING).unwrap_err();
        assert!(matches!(err, OpcError::RelationshipNotFound(_)));
    }

    #[test]
    fn test_external_relationship_is_not_a_part() {
        let mut pkg = minimal_package();
        let doc = RelsOwner::from(pn("/word/document.xml"));
        let r_id = pkg
            .add_relationship(&doc, rt::HYPERLINK, RelTarget::External("https://example.com".into()))
            .unwrap();

        assert!(pkg.resolve_relationship(&doc, &r_id).unwrap().is_external());
        assert!(matches!(
            pkg.related_part(&doc, &r_id),
            Err(OpcError::InvalidRelationship(_))
        ));
        // External targets never count as dangling
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_dangling_relationship_fails_validation() {
        let mut pkg = minimal_package();
        let doc = RelsOwner::from(pn("/word/document.xml"));
        let r_id = pkg
            .add_relationship(&doc, rt::NUMBERING, RelTarget::Internal(pn("/word/numbering.xml")))
            .unwrap();

        assert!(matches!(
            pkg.related_part(&doc, &r_id),
            Err(OpcError::DanglingRelationship { .. })
        ));

        match pkg.to_bytes() {
            Err(OpcError::PackageIntegrity(violations)) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].r_id(), Some(r_id.as_str()));
                let message = OpcError::PackageIntegrity(violations).to_string();
                assert!(message.contains(&r_id));
            },
            other => panic!("expected integrity failure, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_resolve_missing_id() {
        let pkg = minimal_package();
        let err = pkg
            .resolve_relationship(&RelsOwner::Package, "rId42")
            .unwrap_err();
        assert!(matches!(err, OpcError::DanglingRelationship { ref r_id, .. } if r_id == "rId42"));

        let styles = RelsOwner::from(pn("/word/styles.xml"));
        assert!(matches!(
            pkg.resolve_relationship(&styles, "rId1"),
            Err(OpcError::DanglingRelationship { .. })
        ));
    }

    #[test]
    fn test_remove_part_reject_and_cascade() {
        let mut pkg = minimal_package();
        let styles = pn("/word/styles.xml");

        let err = pkg
            .remove_part(&styles, RemovalPolicy::Reject)
            .unwrap_err();
        match err {
            OpcError::PartInUse { referenced_by, .. } => {
                assert_eq!(referenced_by, vec!["/word/document.xml".to_string()])
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(pkg.contains_part(&styles));

        let removed = pkg.remove_part(&styles, RemovalPolicy::Cascade).unwrap();
        assert_eq!(removed.partname(), &styles);
        assert!(!pkg.contains_part(&styles));
        assert!(pkg.content_types().resolve(&styles).is_ok_and(|t| t == &ct::XML));
        let doc_rels = pkg.get_part(&pn("/word/document.xml")).unwrap().rels().unwrap();
        assert!(doc_rels.is_empty());
        assert!(pkg.validate().is_ok());
    }

    #[test]
    fn test_cascade_removal_can_orphan_targets() {
        let mut pkg = minimal_package();
        pkg.remove_part(&pn("/word/document.xml"), RemovalPolicy::Cascade)
            .unwrap();

        assert!(pkg.rels().is_empty());
        assert!(pkg.reachable_parts().is_empty());
        match pkg.validate() {
            Err(OpcError::PackageIntegrity(violations)) => assert_eq!(
                violations,
                vec![IntegrityViolation::OrphanPart {
                    partname: "/word/styles.xml".to_string()
                }]
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_remove_relationship_keeps_ids_fresh() {
        let mut pkg = minimal_package();
        let doc = RelsOwner::from(pn("/word/document.xml"));
        let removed = pkg.remove_relationship(&doc, "rId1").unwrap();
        assert_eq!(removed.reltype(), rt::STYLES);
        assert!(matches!(
            pkg.remove_relationship(&doc, "rId1"),
            Err(OpcError::RelationshipNotFound(_))
        ));

        let r_id = pkg
            .add_relationship(&doc, rt::STYLES, RelTarget::Internal(pn("/word/styles.xml")))
            .unwrap();
        assert_eq!(r_id, "rId2");
    }

    #[test]
    fn test_next_partname() {
        let mut pkg = minimal_package();
        let template = "/word/media/image%d.png";
        let first = pkg.next_partname(template).unwrap();
        assert_eq!(first.as_str(), "/word/media/image1.png");

        let image = Part::new(first.clone(), ct::PNG, Payload::Binary(vec![0x89, b'P'])).unwrap();
        pkg.add_part(image, &RelsOwner::from(pn("/word/document.xml")), rt::IMAGE)
            .unwrap();
        assert_eq!(
            pkg.next_partname(template).unwrap().as_str(),
            "/word/media/image2.png"
        );
        assert!(pkg.next_partname("/word/document.xml").is_err());
    }

    #[test]
    fn test_content_type_change_is_reported() {
        let mut pkg = minimal_package();
        let styles = pn("/word/styles.xml");
        pkg.content_types_mut().remove_override(&styles);
        pkg.content_types_mut().remove_default("xml");

        match pkg.validate() {
            Err(OpcError::PackageIntegrity(violations)) => {
                assert!(violations.contains(&IntegrityViolation::UntypedPart {
                    partname: "/word/styles.xml".to_string()
                }));
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_preserves_graph() {
        let mut pkg = minimal_package();
        let doc = RelsOwner::from(pn("/word/document.xml"));
        let image = Part::new(
            pn("/word/media/image1.png"),
            ct::PNG,
            Payload::Binary(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a]),
        )
        .unwrap();
        pkg.add_part(image, &doc, rt::IMAGE).unwrap();
        pkg.add_relationship(&doc, rt::HYPERLINK, RelTarget::External("https://example.com/a?b=1".into()))
            .unwrap();
        let core = xml_part("/docProps/core.xml", ct::OPC_CORE_PROPERTIES, "<cp:coreProperties xmlns:cp=\"urn:cp\"/>");
        pkg.add_part(core, &RelsOwner::Package, rt::CORE_PROPERTIES)
            .unwrap();

        let bytes = pkg.to_bytes().unwrap();
        let loaded = OpcPackage::from_bytes(&bytes).unwrap();

        let names = |p: &OpcPackage| -> Vec<String> {
            p.iter_parts().map(|part| part.partname().to_string()).collect()
        };
        assert_eq!(names(&loaded), names(&pkg));

        let edges = |rels: Option<&Relationships>| -> Vec<(String, String, String)> {
            rels.map(|r| {
                r.iter()
                    .map(|rel| (rel.r_id().to_string(), rel.reltype().to_string(), rel.target().to_string()))
                    .collect()
            })
            .unwrap_or_default()
        };
        assert_eq!(edges(Some(loaded.rels())), edges(Some(pkg.rels())));

        for part in pkg.iter_parts() {
            let other = loaded.get_part(part.partname()).unwrap();
            assert_eq!(edges(other.rels()), edges(part.rels()));
            assert_eq!(
                loaded.content_types().resolve(part.partname()).unwrap(),
                pkg.content_types().resolve(part.partname()).unwrap()
            );
            assert_eq!(other.content_type(), part.content_type());
            assert_eq!(other.blob(), part.blob());
        }

        // Saving the loaded package reproduces the same archive contents
        let again = OpcPackage::from_bytes(&loaded.to_bytes().unwrap()).unwrap();
        assert_eq!(names(&again), names(&pkg));
    }

    #[test]
    fn test_xml_payload_edit_survives_save() {
        let mut pkg = minimal_package();
        let doc = pkg.get_part_mut(&pn("/word/document.xml")).unwrap();
        let root = doc.xml_mut().unwrap().root_mut();
        root.set_attribute("w:conformance", "strict");

        let loaded = OpcPackage::from_bytes(&pkg.to_bytes().unwrap()).unwrap();
        let doc: &XmlDocument = loaded.main_document_part().unwrap().xml().unwrap();
        assert_eq!(doc.root().attribute("w:conformance").as_deref(), Some("strict"));
    }
}
