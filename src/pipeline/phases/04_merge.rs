//! Consensus merge of raw specialist candidates into canonical parts
//!
//! Candidates are canonicalised through the ontology and grouped by
//! `(canonical_name, area)`. Each group folds into one part: maximum
//! confidence, support-weighted severity vote (ties go to the more severe
//! value), evidence deduplicated by content hash, description from the
//! strongest member. Groups sharing a name across areas are then joined
//! when their evidence overlaps.
//!
//! Every choice is a function of the candidate multiset, so the result
//! does not depend on input order, and merging the output again through
//! [`ConsensusMerger::merge_input`] reproduces it.

use crate::domain::{
    Angle, CanonicalDamagePart, DamageArea, DamageCandidate, ImageRef, MergeStats, Severity,
};
use crate::ontology::{PartOntology, UNCLASSIFIED_CONFIDENCE_CAP};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const PHASE: &str = "merge";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub parts: Vec<CanonicalDamagePart>,
    pub stats: MergeStats,
}

struct Member<'a> {
    candidate: &'a DamageCandidate,
    confidence: f64,
}

struct Group<'a> {
    name: String,
    area: DamageArea,
    classified: bool,
    safety_critical: bool,
    members: Vec<Member<'a>>,
}

impl Group<'_> {
    fn confidence(&self) -> f64 {
        self.members
            .iter()
            .map(|m| m.confidence)
            .fold(0.0, f64::max)
    }

    fn support(&self) -> u32 {
        self.members.iter().map(|m| m.candidate.support.max(1)).sum()
    }

    fn hashes(&self) -> BTreeSet<&str> {
        self.members
            .iter()
            .flat_map(|m| m.candidate.evidence_images.iter())
            .map(|img| img.content_hash.as_str())
            .collect()
    }
}

fn image_key(img: &ImageRef) -> (&str, &str, Option<Angle>, &'static str, bool) {
    (
        img.id.as_str(),
        img.url.as_str(),
        img.angle,
        img.category.as_str(),
        img.is_closeup,
    )
}

/// Support-weighted vote. Unspecified severities do not vote; with no
/// votes at all the part defaults to minor.
fn vote_severity(members: &[&Member<'_>]) -> Severity {
    let mut votes: BTreeMap<Severity, u32> = BTreeMap::new();
    for member in members {
        if let Some(severity) = member.candidate.severity {
            *votes.entry(severity).or_default() += member.candidate.support.max(1);
        }
    }
    votes
        .into_iter()
        .max_by(|(sa, ca), (sb, cb)| ca.cmp(cb).then(sa.cmp(sb)))
        .map(|(severity, _)| severity)
        .unwrap_or(Severity::Minor)
}

/// Highest confidence, then longest text, then lexicographically first.
fn pick_description(members: &[&Member<'_>]) -> String {
    members
        .iter()
        .map(|m| (m.confidence, m.candidate.description.as_str()))
        .max_by(|(ca, da), (cb, db)| {
            ca.total_cmp(cb)
                .then(da.len().cmp(&db.len()))
                .then_with(|| db.cmp(da))
        })
        .map(|(_, d)| d.to_string())
        .unwrap_or_default()
}

fn collect_evidence(members: &[&Member<'_>]) -> Vec<ImageRef> {
    let mut by_hash: BTreeMap<&str, &ImageRef> = BTreeMap::new();
    for image in members.iter().flat_map(|m| m.candidate.evidence_images.iter()) {
        by_hash
            .entry(image.content_hash.as_str())
            .and_modify(|kept| {
                if image_key(image) < image_key(*kept) {
                    *kept = image;
                }
            })
            .or_insert(image);
    }
    by_hash.into_values().cloned().collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ConsensusMerger<'a> {
    ontology: &'a PartOntology,
}

impl<'a> ConsensusMerger<'a> {
    pub fn new(ontology: &'a PartOntology) -> Self {
        Self { ontology }
    }

    pub fn merge(&self, candidates: &[DamageCandidate]) -> MergeOutcome {
        let mut stats = MergeStats {
            candidates_in: candidates.len(),
            ..MergeStats::default()
        };

        let mut groups: BTreeMap<(String, DamageArea), Group<'_>> = BTreeMap::new();
        for candidate in candidates {
            let canonical = self.ontology.canonicalize(&candidate.raw_part_name);
            let confidence = if canonical.classified {
                candidate.confidence
            } else {
                stats.unclassified += 1;
                candidate.confidence.min(UNCLASSIFIED_CONFIDENCE_CAP)
            };

            groups
                .entry((canonical.name.clone(), candidate.area))
                .or_insert_with(|| Group {
                    name: canonical.name,
                    area: candidate.area,
                    classified: canonical.classified,
                    safety_critical: canonical.safety_critical,
                    members: Vec::new(),
                })
                .members
                .push(Member {
                    candidate,
                    confidence,
                });
        }
        stats.groups = groups.len();

        let groups: Vec<Group<'_>> = groups.into_values().collect();
        let components = cross_area_components(&groups);

        let mut parts: Vec<CanonicalDamagePart> = components
            .iter()
            .map(|component| {
                stats.cross_area_merges += component.len() - 1;
                fold_component(&groups, component)
            })
            .collect();

        parts.sort_by(report_order);

        debug!(
            candidates = stats.candidates_in,
            groups = stats.groups,
            parts = parts.len(),
            cross_area = stats.cross_area_merges,
            "Merged candidates"
        );

        MergeOutcome { parts, stats }
    }

    /// Rebuilds candidates from merged parts, one per part, carrying the
    /// part's evidence count as support.
    pub fn merge_input(parts: &[CanonicalDamagePart]) -> Vec<DamageCandidate> {
        parts
            .iter()
            .map(|part| DamageCandidate {
                area: part.area,
                raw_part_name: part.canonical_name.clone(),
                description: part.description.clone(),
                confidence: part.confidence,
                severity: Some(part.severity),
                source_phase: PHASE.to_string(),
                prompt_variant: None,
                temperature: None,
                evidence_images: part.evidence_image_refs.clone(),
                support: part.evidence_count.max(1),
            })
            .collect()
    }
}

/// Groups sorted by key; returns index sets, each either a single group
/// or same-name groups from different areas linked by shared evidence.
fn cross_area_components(groups: &[Group<'_>]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..groups.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let hashes: Vec<BTreeSet<&str>> = groups.iter().map(Group::hashes).collect();
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            if groups[i].name != groups[j].name {
                // Sorted by name first, so no later group can match either.
                break;
            }
            if hashes[i].is_disjoint(&hashes[j]) {
                continue;
            }
            let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
            if ri != rj {
                parent[ri.max(rj)] = ri.min(rj);
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..groups.len() {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }
    components.into_values().collect()
}

fn fold_component(groups: &[Group<'_>], component: &[usize]) -> CanonicalDamagePart {
    // Area of the strongest group; lowest area wins a full tie.
    let lead = component
        .iter()
        .map(|&i| &groups[i])
        .max_by(|a, b| {
            a.confidence()
                .total_cmp(&b.confidence())
                .then(a.support().cmp(&b.support()))
                .then(b.area.cmp(&a.area))
        })
        .unwrap_or(&groups[component[0]]);

    let members: Vec<&Member<'_>> = component
        .iter()
        .flat_map(|&i| groups[i].members.iter())
        .collect();

    let evidence_count: u32 = component.iter().map(|&i| groups[i].support()).sum();
    let confidence = members.iter().map(|m| m.confidence).fold(0.0, f64::max);

    if component.len() > 1 {
        info!(
            part = %lead.name,
            area = %lead.area,
            groups = component.len(),
            "Joined part seen from several areas"
        );
    }

    CanonicalDamagePart {
        canonical_name: lead.name.clone(),
        area: lead.area,
        severity: vote_severity(&members),
        confidence,
        evidence_count,
        evidence_image_refs: collect_evidence(&members),
        description: pick_description(&members),
        classified: lead.classified,
        safety_critical: lead.safety_critical,
        repair_method: None,
        technical_description: None,
        labor_hours: None,
        paint_hours: None,
        cost: None,
    }
}

/// Sorts `a` relative to `b` for reports: severity descending, then name, then area.
pub fn report_order(a: &CanonicalDamagePart, b: &CanonicalDamagePart) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        .then(a.area.cmp(&b.area))
}
