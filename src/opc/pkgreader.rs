//! Reconstructs an [`OpcPackage`] from a serialized OPC package.
//!
//! Loading walks the relationship graph breadth-first from the package
//! relationships, so only the parts a consumer can actually reach are wired
//! into the graph. Problems with individual parts are collected as
//! [`LoadWarning`]s rather than failing the whole load, except for parts
//! targeted by a mandatory package relationship (the main document by
//! default), whose failure is fatal.

use crate::opc::constants::target_mode;
use crate::opc::content_types::{ContentType, ContentTypeMap};
use crate::opc::error::{OpcError, Result};
use crate::opc::options::LoadOptions;
use crate::opc::package::OpcPackage;
use crate::opc::packuri::{CONTENT_TYPES_MEMBER, PartName, RelsOwner};
use crate::opc::part::Part;
use crate::opc::phys_pkg::PhysPkgReader;
use crate::opc::rel::{Relationship, Relationships};
use quick_xml::Reader;
use quick_xml::events::Event;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};

/// Serialized relationship as read from a .rels file.
///
/// Contains all relationship information in string form, before being
/// resolved against its owner's base URI.
#[derive(Debug, Clone)]
pub struct SerializedRelationship {
    /// Relationship ID (e.g., "rId1")
    pub r_id: String,

    /// Relationship type URI
    pub reltype: String,

    /// Target reference (relative URI or external URL)
    pub target_ref: String,

    /// Target mode (Internal or External)
    pub target_mode: String,
}

impl SerializedRelationship {
    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode == target_mode::EXTERNAL
    }
}

/// A non-fatal problem found while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarning {
    /// An archive member whose name is not a valid part name
    InvalidMemberName { membername: String, reason: String },

    /// A member naming the same part as an earlier member; it was skipped
    DuplicateMember { membername: String, partname: String },

    /// A relationships entry that could not be parsed; its owner has no relationships
    MalformedRelationships { owner: String, reason: String },

    /// A single relationship that was dropped
    InvalidRelationship {
        owner: String,
        r_id: String,
        reason: String,
    },

    /// A relationship whose target has no archive member
    MissingPart {
        owner: String,
        r_id: String,
        partname: String,
    },

    /// A part with no resolvable content type; its bytes are kept in
    /// [`LoadedPackage::unresolved`]
    UntypedPart { partname: String },

    /// A part whose payload could not be decoded; it was not loaded
    PartLoad { partname: String, reason: String },

    /// An entry unreachable from the package relationships
    Orphan { partname: String },

    /// A relationships entry whose owner is not in the package
    OrphanRelationships { membername: String },
}

impl LoadWarning {
    /// The part or member the warning is about.
    pub fn subject(&self) -> &str {
        match self {
            LoadWarning::InvalidMemberName { membername, .. }
            | LoadWarning::DuplicateMember { membername, .. }
            | LoadWarning::OrphanRelationships { membername } => membername,
            LoadWarning::MalformedRelationships { owner, .. }
            | LoadWarning::InvalidRelationship { owner, .. } => owner,
            LoadWarning::MissingPart { partname, .. }
            | LoadWarning::UntypedPart { partname }
            | LoadWarning::PartLoad { partname, .. }
            | LoadWarning::Orphan { partname } => partname,
        }
    }

    #[inline]
    pub fn is_orphan(&self) -> bool {
        matches!(self, LoadWarning::Orphan { .. })
    }
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::InvalidMemberName { membername, reason } => {
                write!(f, "skipped member '{}': {}", membername, reason)
            },
            LoadWarning::DuplicateMember {
                membername,
                partname,
            } => write!(f, "skipped member '{}': {} already taken", membername, partname),
            LoadWarning::MalformedRelationships { owner, reason } => {
                write!(f, "malformed relationships of {}: {}", owner, reason)
            },
            LoadWarning::InvalidRelationship {
                owner,
                r_id,
                reason,
            } => write!(f, "dropped relationship {} of {}: {}", r_id, owner, reason),
            LoadWarning::MissingPart {
                owner,
                r_id,
                partname,
            } => write!(f, "{} of {} targets missing part {}", r_id, owner, partname),
            LoadWarning::UntypedPart { partname } => {
                write!(f, "{} has no content type", partname)
            },
            LoadWarning::PartLoad { partname, reason } => {
                write!(f, "failed to load {}: {}", partname, reason)
            },
            LoadWarning::Orphan { partname } => write!(f, "orphan part {}", partname),
            LoadWarning::OrphanRelationships { membername } => {
                write!(f, "orphan relationships entry {}", membername)
            },
        }
    }
}

/// Stored content of a part whose content type could not be resolved.
#[derive(Debug, Clone)]
pub struct UnresolvedPart {
    pub partname: PartName,
    pub blob: Vec<u8>,
    pub rels: Option<Relationships>,
}

/// A loaded package together with the warnings collected while loading it.
#[derive(Debug)]
pub struct LoadedPackage {
    pub package: OpcPackage,
    pub warnings: Vec<LoadWarning>,
    /// Untyped parts, held back from the package until given a type
    pub unresolved: Vec<UnresolvedPart>,
}

impl LoadedPackage {
    /// Give an untyped part a content type and add it to the package.
    ///
    /// The type is registered for the part, and relationships read from the
    /// archive that target it resolve again.
    ///
    /// # Errors
    /// - [`OpcError::PartNotFound`] if `partname` was not held back as untyped
    /// - [`OpcError::PartLoad`] if the bytes do not decode as `content_type`
    ///
    /// The part stays in [`LoadedPackage::unresolved`] on error.
    pub fn resolve_untyped<C: Into<ContentType>>(
        &mut self,
        partname: &PartName,
        content_type: C,
    ) -> Result<()> {
        let idx = self
            .unresolved
            .iter()
            .position(|u| &u.partname == partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?;

        let held = &self.unresolved[idx];
        let mut part = Part::load(partname.clone(), content_type, held.blob.clone())?;
        if let Some(rels) = &held.rels {
            part.set_rels(rels.clone());
        }
        self.package.attach_part(part)?;
        self.unresolved.remove(idx);
        Ok(())
    }

    /// True when the load produced no warnings at all.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Part names reported as orphans.
    pub fn orphans(&self) -> impl Iterator<Item = &str> {
        self.warnings
            .iter()
            .filter(|w| w.is_orphan())
            .map(LoadWarning::subject)
    }
}

/// A part waiting to be loaded, with the relationship that reached it.
struct QueuedPart {
    partname: PartName,
    owner: RelsOwner,
    r_id: String,
    mandatory: bool,
}

/// Loads packages according to a set of [`LoadOptions`].
#[derive(Debug, Clone, Default)]
pub struct PackageReader {
    options: LoadOptions,
}

impl PackageReader {
    pub fn new(options: LoadOptions) -> Self {
        Self { options }
    }

    #[inline]
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load a package file.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<LoadedPackage> {
        let mut phys = PhysPkgReader::open(path)?;
        self.load(&mut phys)
    }

    pub fn load_reader<R: Read + Seek>(&self, reader: R) -> Result<LoadedPackage> {
        let mut phys = PhysPkgReader::new(reader)?;
        self.load(&mut phys)
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<LoadedPackage> {
        self.load_reader(Cursor::new(bytes))
    }

    /// Load a package from an opened archive.
    ///
    /// # Errors
    /// - [`OpcError::MalformedContentTypes`] if `[Content_Types].xml` is
    ///   missing or unparsable
    /// - [`OpcError::RelationshipNotFound`] if a mandatory package
    ///   relationship is absent
    /// - [`OpcError::PartNotFound`], [`OpcError::UnknownContentType`] or
    ///   [`OpcError::PartLoad`] if a mandatory part cannot be loaded
    /// - [`OpcError::PartLoad`] for the first warning, in strict mode
    pub fn load<R: Read + Seek>(&self, phys: &mut PhysPkgReader<R>) -> Result<LoadedPackage> {
        let ct_xml = phys.blob_for(CONTENT_TYPES_MEMBER)?.ok_or_else(|| {
            OpcError::MalformedContentTypes(format!("{} is missing", CONTENT_TYPES_MEMBER))
        })?;
        let content_types = ContentTypeMap::from_xml(&ct_xml)?;

        let mut warnings = Vec::new();
        let (mut pending, mut rels_members) = Self::inventory(phys, &mut warnings);

        let pkg_rels = Self::read_rels(phys, RelsOwner::Package, &mut rels_members, &mut warnings)?
            .unwrap_or_else(|| Relationships::new(RelsOwner::Package));
        self.check_mandatory_rels(&pkg_rels)?;

        let mut queue: VecDeque<QueuedPart> = VecDeque::new();
        Self::enqueue_targets(&pkg_rels, |reltype| self.options.is_mandatory(reltype), &mut queue);

        let mut parts: HashMap<PartName, Part> = HashMap::new();
        let mut unresolved: Vec<UnresolvedPart> = Vec::new();
        let mut visited: HashSet<PartName> = HashSet::new();

        while let Some(item) = queue.pop_front() {
            if !visited.insert(item.partname.clone()) {
                continue;
            }

            let Some(membername) = pending.remove(&item.partname) else {
                if item.mandatory {
                    return Err(OpcError::PartNotFound(item.partname.to_string()));
                }
                warnings.push(LoadWarning::MissingPart {
                    owner: item.owner.to_string(),
                    r_id: item.r_id,
                    partname: item.partname.to_string(),
                });
                continue;
            };

            if !item.mandatory && content_types.resolve(&item.partname).is_err() {
                warnings.push(LoadWarning::UntypedPart {
                    partname: item.partname.to_string(),
                });
                unresolved.push(Self::read_untyped(
                    phys,
                    item.partname,
                    &membername,
                    &mut rels_members,
                    &mut warnings,
                )?);
                continue;
            }

            let display_name = item.partname.to_string();
            let loaded = Self::load_part(
                phys,
                &content_types,
                item.partname,
                &membername,
                &mut rels_members,
                &mut warnings,
            );
            let part = match loaded {
                Ok(part) => part,
                Err(e) if item.mandatory || Self::is_archive_error(&e) => return Err(e),
                Err(e) => {
                    warnings.push(Self::part_warning(display_name, e));
                    continue;
                },
            };

            if let Some(rels) = part.rels() {
                Self::enqueue_targets(rels, |_| false, &mut queue);
            }
            parts.insert(part.partname().clone(), part);
        }

        // Whatever is left was never reached from the package relationships
        for (partname, membername) in pending {
            warnings.push(LoadWarning::Orphan {
                partname: partname.to_string(),
            });
            if !self.options.load_orphans {
                continue;
            }
            if content_types.resolve(&partname).is_err() {
                warnings.push(LoadWarning::UntypedPart {
                    partname: partname.to_string(),
                });
                unresolved.push(Self::read_untyped(
                    phys,
                    partname,
                    &membername,
                    &mut rels_members,
                    &mut warnings,
                )?);
                continue;
            }
            let display_name = partname.to_string();
            match Self::load_part(
                phys,
                &content_types,
                partname,
                &membername,
                &mut rels_members,
                &mut warnings,
            ) {
                Ok(part) => {
                    parts.insert(part.partname().clone(), part);
                },
                Err(e) if Self::is_archive_error(&e) => return Err(e),
                Err(e) => warnings.push(Self::part_warning(display_name, e)),
            }
        }

        for membername in rels_members {
            warnings.push(LoadWarning::OrphanRelationships { membername });
        }

        for warning in &warnings {
            warn!(%warning, "package load warning");
        }
        if self.options.strict
            && let Some(first) = warnings.first()
        {
            return Err(OpcError::PartLoad {
                partname: first.subject().to_string(),
                reason: first.to_string(),
            });
        }

        info!(
            parts = parts.len(),
            unresolved = unresolved.len(),
            warnings = warnings.len(),
            "loaded package"
        );
        Ok(LoadedPackage {
            package: OpcPackage::from_loaded(pkg_rels, parts, content_types),
            warnings,
            unresolved,
        })
    }

    /// Sort archive members into candidate parts and relationships entries.
    ///
    /// Directory entries never reach this point; the content types stream is
    /// skipped, and names that are not valid part names are reported.
    fn inventory<R: Read + Seek>(
        phys: &PhysPkgReader<R>,
        warnings: &mut Vec<LoadWarning>,
    ) -> (BTreeMap<PartName, String>, BTreeSet<String>) {
        let mut pending = BTreeMap::new();
        let mut rels_members = BTreeSet::new();

        for membername in phys.member_names() {
            if membername == CONTENT_TYPES_MEMBER {
                continue;
            }
            match PartName::from_membername(&membername) {
                Ok(partname) if partname.is_rels_part() => {
                    rels_members.insert(membername);
                },
                Ok(partname) if pending.contains_key(&partname) => {
                    warnings.push(LoadWarning::DuplicateMember {
                        membername,
                        partname: partname.to_string(),
                    });
                },
                Ok(partname) => {
                    pending.insert(partname, membername);
                },
                Err(e) => warnings.push(LoadWarning::InvalidMemberName {
                    membername,
                    reason: e.to_string(),
                }),
            }
        }

        (pending, rels_members)
    }

    fn check_mandatory_rels(&self, pkg_rels: &Relationships) -> Result<()> {
        for reltype in &self.options.mandatory_reltypes {
            let mut matching = pkg_rels.by_reltype(reltype);
            match matching.next() {
                None => {
                    return Err(OpcError::RelationshipNotFound(format!(
                        "package has no relationship of mandatory type '{}'",
                        reltype
                    )));
                },
                Some(rel) if rel.is_external() => {
                    return Err(OpcError::InvalidRelationship(format!(
                        "{} of mandatory type '{}' is external",
                        rel.r_id(),
                        reltype
                    )));
                },
                Some(_) => {},
            }
        }
        Ok(())
    }

    fn enqueue_targets(
        rels: &Relationships,
        is_mandatory: impl Fn(&str) -> bool,
        queue: &mut VecDeque<QueuedPart>,
    ) {
        for rel in rels.iter() {
            if let Some(partname) = rel.target().partname() {
                queue.push_back(QueuedPart {
                    partname: partname.clone(),
                    owner: rels.owner().clone(),
                    r_id: rel.r_id().to_string(),
                    mandatory: is_mandatory(rel.reltype()),
                });
            }
        }
    }

    /// Resolve the content type, decode the payload and attach relationships.
    fn load_part<R: Read + Seek>(
        phys: &mut PhysPkgReader<R>,
        content_types: &ContentTypeMap,
        partname: PartName,
        membername: &str,
        rels_members: &mut BTreeSet<String>,
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<Part> {
        let content_type = content_types.resolve(&partname)?.clone();
        let blob = phys
            .blob_for(membername)?
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?;

        let mut part = Part::load(partname, content_type, blob)?;
        let owner = RelsOwner::from(part.partname());
        if let Some(rels) = Self::read_rels(phys, owner, rels_members, warnings)? {
            part.set_rels(rels);
        }

        debug!(
            partname = %part.partname(),
            content_type = %part.content_type(),
            "loaded part"
        );
        Ok(part)
    }

    /// Hold back the bytes and relationships of a part with no content type.
    fn read_untyped<R: Read + Seek>(
        phys: &mut PhysPkgReader<R>,
        partname: PartName,
        membername: &str,
        rels_members: &mut BTreeSet<String>,
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<UnresolvedPart> {
        let blob = phys
            .blob_for(membername)?
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?;
        let rels = Self::read_rels(phys, RelsOwner::from(&partname), rels_members, warnings)?;
        debug!(partname = %partname, "held back untyped part");
        Ok(UnresolvedPart {
            partname,
            blob,
            rels,
        })
    }

    /// Read the relationships entry of `owner`, if the archive has one.
    ///
    /// Unparsable entries and individual bad relationships become warnings.
    fn read_rels<R: Read + Seek>(
        phys: &mut PhysPkgReader<R>,
        owner: RelsOwner,
        rels_members: &mut BTreeSet<String>,
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<Option<Relationships>> {
        let membername = owner.rels_membername();
        rels_members.remove(&membername);
        let Some(xml) = phys.blob_for(&membername)? else {
            return Ok(None);
        };

        let mut rels = Relationships::new(owner);
        let srels = match parse_rels_xml(&xml) {
            Ok(srels) => srels,
            Err(e) => {
                warnings.push(LoadWarning::MalformedRelationships {
                    owner: rels.owner().to_string(),
                    reason: e.to_string(),
                });
                return Ok(Some(rels));
            },
        };

        for srel in srels {
            let is_external = srel.is_external();
            let r_id = srel.r_id.clone();
            let inserted = Relationship::from_serialized(
                srel.r_id,
                srel.reltype,
                srel.target_ref,
                rels.base_uri(),
                is_external,
            )
            .and_then(|rel| rels.insert(rel));

            if let Err(e) = inserted {
                warnings.push(LoadWarning::InvalidRelationship {
                    owner: rels.owner().to_string(),
                    r_id,
                    reason: e.to_string(),
                });
            }
        }

        Ok(Some(rels))
    }

    /// Failures of the archive itself abort the load even for optional parts.
    fn is_archive_error(err: &OpcError) -> bool {
        matches!(err, OpcError::Zip(_) | OpcError::Io(_))
    }

    fn part_warning(partname: String, err: OpcError) -> LoadWarning {
        match err {
            OpcError::PartLoad { reason, .. } => LoadWarning::PartLoad { partname, reason },
            other => LoadWarning::PartLoad {
                partname,
                reason: other.to_string(),
            },
        }
    }
}

/// Parse relationships XML into [`SerializedRelationship`]s, in document order.
///
/// # Errors
/// Returns an XML error if the entry is not well-formed or a `Relationship`
/// element lacks its `Id`, `Type` or `Target`.
pub fn parse_rels_xml(rels_xml: &[u8]) -> Result<SmallVec<[SerializedRelationship; 8]>> {
    let mut srels = SmallVec::new();
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut r_id = None;
                let mut reltype = None;
                let mut target_ref = None;
                let mut target_mode = target_mode::INTERNAL.to_string();

                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => r_id = Some(attr.unescape_value()?.to_string()),
                        b"Type" => reltype = Some(attr.unescape_value()?.to_string()),
                        b"Target" => target_ref = Some(attr.unescape_value()?.to_string()),
                        b"TargetMode" => target_mode = attr.unescape_value()?.to_string(),
                        _ => {},
                    }
                }

                match (r_id, reltype, target_ref) {
                    (Some(r_id), Some(reltype), Some(target_ref)) => {
                        srels.push(SerializedRelationship {
                            r_id,
                            reltype,
                            target_ref,
                            target_mode,
                        })
                    },
                    _ => {
                        return Err(OpcError::Xml(
                            "Relationship element missing Id, Type or Target".to_string(),
                        ));
                    },
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpcError::Xml(format!("Rels parse error: {}", e))),
            _ => {},
        }
        buf.clear();
    }

    Ok(srels)
}
