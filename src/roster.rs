//! Group membership, independent of the event log.
//!
//! Callers are expected to have checked authorization before mutating.

use crate::errors::CoreError;
use crate::models::{GroupRecord, Member, MemberRecord};
use crate::storage::StateFile;
use std::cmp::Ordering;

/// Stable member id: lowercase, non-alphanumeric runs collapsed to `-`, with
/// leading and trailing separators trimmed.
pub fn member_id_from_name(name: &str) -> Result<String, CoreError> {
    let mut id = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_separator && !id.is_empty() {
                id.push('-');
            }
            pending_separator = false;
            id.extend(ch.to_lowercase());
        } else {
            pending_separator = true;
        }
    }
    if id.is_empty() {
        return Err(CoreError::invalid(format!(
            "member name `{name}` needs at least one letter or digit"
        )));
    }
    Ok(id)
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn clean_name(name: &str) -> Result<String, CoreError> {
    let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() {
        return Err(CoreError::invalid("member name must not be empty"));
    }
    Ok(name)
}

/// Whether `derived` is already taken in the group, either as an id or as the
/// id the member's current name would derive. `except` skips the member being
/// renamed.
fn id_taken(group: &GroupRecord, derived: &str, except: Option<&str>) -> bool {
    group.members.iter().any(|(other_id, other)| {
        Some(other_id.as_str()) != except
            && (other_id == derived
                || member_id_from_name(&other.name).is_ok_and(|other_derived| other_derived == derived))
    })
}

#[derive(Clone)]
pub struct Roster {
    file: StateFile,
}

impl Roster {
    pub fn new(file: StateFile) -> Self {
        Self { file }
    }

    pub async fn add_member(&self, group_id: &str, name: &str) -> Result<Member, CoreError> {
        let group_id = group_id.trim();
        if group_id.is_empty() {
            return Err(CoreError::invalid("groupId must not be empty"));
        }
        let name = clean_name(name)?;
        let id = member_id_from_name(&name)?;

        let mut data = self.file.lock().await;
        if data
            .groups
            .get(group_id)
            .is_some_and(|group| id_taken(group, &id, None))
        {
            return Err(CoreError::DuplicateMember {
                group_id: group_id.to_string(),
                member_id: id,
            });
        }

        let mut next = data.clone();
        next.groups
            .entry(group_id.to_string())
            .or_insert_with(|| GroupRecord {
                name: group_id.to_string(),
                ..GroupRecord::default()
            })
            .members
            .insert(
                id.clone(),
                MemberRecord {
                    name: name.clone(),
                    is_out: false,
                },
            );
        self.file.persist(&next).await?;
        *data = next;

        Ok(Member {
            id,
            group_id: group_id.to_string(),
            name,
        })
    }

    /// Changes the display name and keeps the id, so today's events still
    /// resolve to the member. The new name may not derive another member's id.
    pub async fn rename_member(&self, group_id: &str, id: &str, new_name: &str) -> Result<Member, CoreError> {
        let name = clean_name(new_name)?;
        let derived = member_id_from_name(&name)?;

        let mut data = self.file.lock().await;
        let group = data
            .groups
            .get(group_id)
            .ok_or_else(|| CoreError::NotFound(format!("group `{group_id}`")))?;
        if !group.members.contains_key(id) {
            return Err(CoreError::NotFound(format!("member `{id}` in group `{group_id}`")));
        }
        if id_taken(group, &derived, Some(id)) {
            return Err(CoreError::DuplicateMember {
                group_id: group_id.to_string(),
                member_id: derived,
            });
        }

        let mut next = data.clone();
        if let Some(member) = next
            .groups
            .get_mut(group_id)
            .and_then(|group| group.members.get_mut(id))
        {
            member.name = name.clone();
        }
        self.file.persist(&next).await?;
        *data = next;

        Ok(Member {
            id: id.to_string(),
            group_id: group_id.to_string(),
            name,
        })
    }

    /// Returns the removed member so the caller can drop a stale selection.
    /// Absent ids are a no-op.
    pub async fn remove_member(&self, group_id: &str, id: &str) -> Result<Option<Member>, CoreError> {
        let mut data = self.file.lock().await;
        let Some(record) = data
            .groups
            .get(group_id)
            .and_then(|group| group.members.get(id))
            .cloned()
        else {
            return Ok(None);
        };

        let mut next = data.clone();
        if let Some(group) = next.groups.get_mut(group_id) {
            group.members.remove(id);
        }
        self.file.persist(&next).await?;
        *data = next;

        Ok(Some(Member {
            id: id.to_string(),
            group_id: group_id.to_string(),
            name: record.name,
        }))
    }

    /// Members sorted by name, case-insensitively.
    pub async fn list_members(&self, group_id: &str) -> Vec<Member> {
        let data = self.file.lock().await;
        let mut members: Vec<Member> = data
            .groups
            .get(group_id)
            .into_iter()
            .flat_map(|group| group.members.iter())
            .map(|(id, record)| Member {
                id: id.clone(),
                group_id: group_id.to_string(),
                name: record.name.clone(),
            })
            .collect();
        members.sort_by(|a, b| compare_names(&a.name, &b.name));
        members
    }

    pub async fn find_member(&self, group_id: &str, id: &str) -> Option<Member> {
        let data = self.file.lock().await;
        data.groups
            .get(group_id)
            .and_then(|group| group.members.get(id))
            .map(|record| Member {
                id: id.to_string(),
                group_id: group_id.to_string(),
                name: record.name.clone(),
            })
    }

    pub async fn has_group(&self, group_id: &str) -> bool {
        self.file.lock().await.groups.contains_key(group_id)
    }

    /// `(id, display name, member count)` for every known group.
    pub async fn list_groups(&self) -> Vec<(String, String, usize)> {
        let data = self.file.lock().await;
        data.groups
            .iter()
            .map(|(id, group)| (id.clone(), group.name.clone(), group.members.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppData;

    fn roster() -> Roster {
        Roster::new(StateFile::in_memory(AppData::default()))
    }

    #[test]
    fn member_id_normalizes_name() {
        assert_eq!(member_id_from_name("Abner M.").unwrap(), "abner-m");
        assert_eq!(member_id_from_name("  --Angel   C.--").unwrap(), "angel-c");
        assert_eq!(member_id_from_name("Mary-Kate O'Neil").unwrap(), "mary-kate-o-neil");
        assert_eq!(member_id_from_name("José 2").unwrap(), "josé-2");
    }

    #[test]
    fn member_id_needs_alphanumerics() {
        assert!(matches!(
            member_id_from_name(" .- "),
            Err(CoreError::StructuralValidation(_))
        ));
    }

    #[tokio::test]
    async fn add_rejects_duplicate_derived_id() {
        let roster = roster();
        roster.add_member("smith", "Abner M.").await.unwrap();
        let err = roster.add_member("smith", "abner  m").await.unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateMember {
                group_id: "smith".into(),
                member_id: "abner-m".into(),
            }
        );
        assert!(roster.add_member("jones", "Abner M.").await.is_ok());
    }

    #[tokio::test]
    async fn list_is_sorted_case_insensitively() {
        let roster = roster();
        for name in ["bella R.", "Angel C.", "Abner M.", "Zed"] {
            roster.add_member("smith", name).await.unwrap();
        }
        let names: Vec<String> = roster
            .list_members("smith")
            .await
            .into_iter()
            .map(|member| member.name)
            .collect();
        assert_eq!(names, ["Abner M.", "Angel C.", "bella R.", "Zed"]);
    }

    #[tokio::test]
    async fn rename_keeps_id_and_rejects_collisions() {
        let roster = roster();
        roster.add_member("smith", "Abner M.").await.unwrap();
        roster.add_member("smith", "Angel C.").await.unwrap();

        let renamed = roster.rename_member("smith", "abner-m", "Abner Morales").await.unwrap();
        assert_eq!(renamed.id, "abner-m");
        assert_eq!(renamed.name, "Abner Morales");

        let err = roster.rename_member("smith", "abner-m", "angel c").await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateMember { .. }));
    }

    #[tokio::test]
    async fn add_rejects_name_taken_by_rename() {
        let roster = roster();
        roster.add_member("smith", "Abner M.").await.unwrap();
        roster.rename_member("smith", "abner-m", "Zed").await.unwrap();

        let err = roster.add_member("smith", "zed").await.unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateMember {
                group_id: "smith".into(),
                member_id: "zed".into(),
            }
        );
        let members = roster.list_members("smith").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "abner-m");

        roster.rename_member("smith", "abner-m", "Abner M.").await.unwrap();
        assert!(roster.add_member("smith", "Zed").await.is_ok());
    }

    #[tokio::test]
    async fn has_group_after_first_member() {
        let roster = roster();
        assert!(!roster.has_group("smith").await);
        roster.add_member("smith", "Abner M.").await.unwrap();
        assert!(roster.has_group("smith").await);
    }

    #[tokio::test]
    async fn rename_missing_member_is_not_found() {
        let roster = roster();
        roster.add_member("smith", "Abner M.").await.unwrap();
        let err = roster.rename_member("smith", "ghost", "Ghost").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_is_noop_when_absent() {
        let roster = roster();
        roster.add_member("smith", "Abner M.").await.unwrap();
        assert!(roster.remove_member("smith", "ghost").await.unwrap().is_none());
        let removed = roster.remove_member("smith", "abner-m").await.unwrap();
        assert_eq!(removed.map(|member| member.name), Some("Abner M.".to_string()));
        assert!(roster.list_members("smith").await.is_empty());
    }
}
