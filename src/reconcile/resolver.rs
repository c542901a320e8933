//! Row -> Region/Cluster/School/Student resolution.
//!
//! Every tier is matched exactly on its normalized name key inside the
//! parent the row already resolved to. Nothing here writes; tiers that do not
//! match are either flagged for creation or left unresolved.

use super::normalize::{name_key, student_name_key};
use super::row::UploadRow;
use serde::Serialize;

/// Read access to reference data, keyed by normalized name.
pub trait ReferenceLookup {
    fn regions_by_key(&self, key: &str) -> anyhow::Result<Vec<String>>;
    fn clusters_by_key(&self, region_id: &str, key: &str) -> anyhow::Result<Vec<String>>;
    fn schools_by_key(&self, cluster_id: &str, key: &str) -> anyhow::Result<Vec<String>>;
    fn schools_by_code(&self, cluster_id: &str, code: &str) -> anyhow::Result<Vec<String>>;
    fn school_names(&self, cluster_id: &str) -> anyhow::Result<Vec<String>>;
    fn students_by_key(
        &self,
        school_id: &str,
        grade: i64,
        key: &str,
    ) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Region,
    Cluster,
    School,
    Student,
}

impl TierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Region => "region",
            Self::Cluster => "cluster",
            Self::School => "school",
            Self::Student => "student",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    Blank,
    NotFound,
    Ambiguous,
    ParentUnresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnresolvedReason {
    pub tier: TierKind,
    pub why: Why,
}

impl UnresolvedReason {
    fn new(tier: TierKind, why: Why) -> Self {
        Self { tier, why }
    }

    pub fn code(self) -> String {
        let why = match self.why {
            Why::Blank => "blank",
            Why::NotFound => "not_found",
            Why::Ambiguous => "ambiguous",
            Why::ParentUnresolved => "parent_unresolved",
        };
        format!("{}_{}", self.tier.as_str(), why)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tier<T> {
    Existing(String),
    ToCreate(T),
    Unresolved(UnresolvedReason),
}

impl<T> Tier<T> {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Tier::Unresolved(_))
    }

    pub fn existing_id(&self) -> Option<&str> {
        match self {
            Tier::Existing(id) => Some(id),
            _ => None,
        }
    }

    fn reason(&self) -> Option<UnresolvedReason> {
        match self {
            Tier::Unresolved(r) => Some(*r),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRegion {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCluster {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSchool {
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub index_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowResolution {
    pub region: Tier<NewRegion>,
    pub cluster: Tier<NewCluster>,
    pub school: Tier<NewSchool>,
    pub student: Tier<NewStudent>,
}

impl RowResolution {
    pub fn is_resolved(&self) -> bool {
        !(self.region.is_unresolved()
            || self.cluster.is_unresolved()
            || self.school.is_unresolved()
            || self.student.is_unresolved())
    }

    /// The tier that actually failed; children of it only report `ParentUnresolved`.
    pub fn unresolved_reason(&self) -> Option<UnresolvedReason> {
        [
            self.region.reason(),
            self.cluster.reason(),
            self.school.reason(),
            self.student.reason(),
        ]
        .into_iter()
        .flatten()
        .find(|r| r.why != Why::ParentUnresolved)
    }

    /// Stable identity per tier: the existing id, or the normalized parent
    /// path of an entity still to be created. Two rows naming the same new
    /// school under the same new cluster get the same school key.
    pub fn entity_keys(&self, row: &UploadRow, grade: i64) -> Option<EntityKeys> {
        let region = match &self.region {
            Tier::Existing(id) => format!("id:{}", id),
            Tier::ToCreate(n) => format!("new:{}", name_key(&n.name)),
            Tier::Unresolved(_) => return None,
        };
        let cluster = match &self.cluster {
            Tier::Existing(id) => format!("id:{}", id),
            Tier::ToCreate(n) => format!("{}/new:{}", region, name_key(&n.name)),
            Tier::Unresolved(_) => return None,
        };
        let school = match &self.school {
            Tier::Existing(id) => format!("id:{}", id),
            Tier::ToCreate(n) => format!("{}/new:{}", cluster, name_key(&n.name)),
            Tier::Unresolved(_) => return None,
        };
        let student = match &self.student {
            Tier::Existing(id) => format!("id:{}", id),
            Tier::ToCreate(_) => format!(
                "{}/new:{}:{}",
                school,
                grade,
                student_name_key(&row.first_name, &row.last_name)
            ),
            Tier::Unresolved(_) => return None,
        };
        Some(EntityKeys {
            region,
            cluster,
            school,
            student,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKeys {
    pub region: String,
    pub cluster: String,
    pub school: String,
    pub student: String,
}

impl EntityKeys {
    pub fn is_new(key: &str) -> bool {
        !key.starts_with("id:")
    }
}

/// Which location tiers may be provisioned when no existing entity matches.
/// Students are always creatable under a resolved school.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCreate {
    pub regions: bool,
    pub clusters: bool,
    pub schools: bool,
}

impl Default for AutoCreate {
    fn default() -> Self {
        Self {
            regions: true,
            clusters: true,
            schools: true,
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

fn pick<T>(ids: Vec<String>, tier: TierKind) -> Option<Tier<T>> {
    match ids.len() {
        0 => None,
        1 => ids.into_iter().next().map(Tier::Existing),
        _ => Some(Tier::Unresolved(UnresolvedReason::new(tier, Why::Ambiguous))),
    }
}

fn create_or_not_found<T>(allowed: bool, tier: TierKind, fields: T) -> Tier<T> {
    if allowed {
        Tier::ToCreate(fields)
    } else {
        Tier::Unresolved(UnresolvedReason::new(tier, Why::NotFound))
    }
}

fn parent_unresolved<T>(tier: TierKind) -> Tier<T> {
    Tier::Unresolved(UnresolvedReason::new(tier, Why::ParentUnresolved))
}

fn blank<T>(tier: TierKind) -> Tier<T> {
    Tier::Unresolved(UnresolvedReason::new(tier, Why::Blank))
}

pub fn resolve_row<L: ReferenceLookup + ?Sized>(
    lookup: &L,
    row: &UploadRow,
    grade: i64,
    policy: &AutoCreate,
) -> anyhow::Result<RowResolution> {
    let region = match non_empty(&row.region) {
        None => blank(TierKind::Region),
        Some(name) => match pick(lookup.regions_by_key(&name_key(name))?, TierKind::Region) {
            Some(t) => t,
            None => create_or_not_found(
                policy.regions,
                TierKind::Region,
                NewRegion {
                    name: name.to_string(),
                },
            ),
        },
    };

    let cluster = match (non_empty(&row.location), &region) {
        (None, _) => blank(TierKind::Cluster),
        (Some(_), Tier::Unresolved(_)) => parent_unresolved(TierKind::Cluster),
        (Some(name), parent) => {
            let found = match parent {
                Tier::Existing(region_id) => pick(
                    lookup.clusters_by_key(region_id, &name_key(name))?,
                    TierKind::Cluster,
                ),
                _ => None,
            };
            found.unwrap_or_else(|| {
                create_or_not_found(
                    policy.clusters,
                    TierKind::Cluster,
                    NewCluster {
                        name: name.to_string(),
                    },
                )
            })
        }
    };

    let code = non_empty(&row.school_code);
    let school = match (non_empty(&row.school_name), &cluster) {
        (None, _) => blank(TierKind::School),
        (Some(_), Tier::Unresolved(_)) => parent_unresolved(TierKind::School),
        (Some(name), parent) => {
            let mut found = None;
            if let Tier::Existing(cluster_id) = parent {
                found = pick(
                    lookup.schools_by_key(cluster_id, &name_key(name))?,
                    TierKind::School,
                );
                if found.is_none() {
                    if let Some(code) = code {
                        found = pick(lookup.schools_by_code(cluster_id, code)?, TierKind::School);
                    }
                }
            }
            found.unwrap_or_else(|| {
                create_or_not_found(
                    policy.schools,
                    TierKind::School,
                    NewSchool {
                        name: name.to_string(),
                        code: code.map(|c| c.to_string()),
                    },
                )
            })
        }
    };

    let new_student = || NewStudent {
        first_name: row.first_name.trim().to_string(),
        last_name: row.last_name.trim().to_string(),
        index_number: non_empty(&row.student_number).map(|s| s.to_string()),
    };
    let student = match (non_empty(&row.first_name), &school) {
        (None, _) => blank(TierKind::Student),
        (Some(_), Tier::Unresolved(_)) => parent_unresolved(TierKind::Student),
        (Some(_), Tier::ToCreate(_)) => Tier::ToCreate(new_student()),
        (Some(_), Tier::Existing(school_id)) => {
            let key = student_name_key(&row.first_name, &row.last_name);
            pick(
                lookup.students_by_key(school_id, grade, &key)?,
                TierKind::Student,
            )
            .unwrap_or_else(|| Tier::ToCreate(new_student()))
        }
    };

    Ok(RowResolution {
        region,
        cluster,
        school,
        student,
    })
}
