use crate::errors::CoreError;
use crate::models::AppData;
use std::{collections::BTreeMap, path::Path, path::PathBuf, sync::Arc};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, warn};

/// Shared handle on the persisted state document.
///
/// Writers lock, mutate a copy, `persist` it, then commit the copy, so a
/// failed write leaves the in-memory document untouched.
#[derive(Clone)]
pub struct StateFile {
    path: Option<PathBuf>,
    data: Arc<Mutex<AppData>>,
}

impl StateFile {
    pub async fn open(path: PathBuf) -> Self {
        let data = load_data(&path).await;
        Self {
            path: Some(path),
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// A document that lives only in memory.
    pub fn in_memory(data: AppData) -> Self {
        Self {
            path: None,
            data: Arc::new(Mutex::new(data)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn lock(&self) -> MutexGuard<'_, AppData> {
        self.data.lock().await
    }

    pub async fn persist(&self, data: &AppData) -> Result<(), CoreError> {
        match &self.path {
            Some(path) => persist_data(path, data).await,
            None => Ok(()),
        }
    }

    /// Writes derived status into the members' `isOut` cache.
    pub async fn record_status(&self, group_id: &str, status: &BTreeMap<String, bool>) {
        let mut data = self.lock().await;
        let Some(group) = data.groups.get(group_id) else {
            return;
        };
        let changed = group
            .members
            .iter()
            .any(|(id, member)| member.is_out != status.get(id).copied().unwrap_or(false));
        if !changed {
            return;
        }

        let mut next = data.clone();
        if let Some(group) = next.groups.get_mut(group_id) {
            for (id, member) in group.members.iter_mut() {
                member.is_out = status.get(id).copied().unwrap_or(false);
            }
        }
        match self.persist(&next).await {
            Ok(()) => *data = next,
            Err(err) => warn!(group_id, "failed to persist status cache: {err}"),
        }
    }

    pub async fn clear_status(&self) {
        let mut data = self.lock().await;
        let mut next = data.clone();
        next.groups
            .values_mut()
            .flat_map(|group| group.members.values_mut())
            .for_each(|member| member.is_out = false);
        if next == *data {
            return;
        }
        match self.persist(&next).await {
            Ok(()) => *data = next,
            Err(err) => warn!("failed to persist cleared status cache: {err}"),
        }
    }
}

pub async fn load_data(path: &Path) -> AppData {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to parse data file: {err}");
                AppData::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => AppData::default(),
        Err(err) => {
            error!("failed to read data file: {err}");
            AppData::default()
        }
    }
}

pub async fn persist_data(path: &Path, data: &AppData) -> Result<(), CoreError> {
    let payload = serde_json::to_vec_pretty(data).map_err(CoreError::unavailable)?;
    fs::write(path, payload).await.map_err(CoreError::unavailable)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupRecord, MemberRecord};

    fn temp_path(label: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("hall_pass_{label}_{}_{nanos}.json", std::process::id()))
    }

    fn one_member_group() -> AppData {
        let mut group = GroupRecord {
            name: "Smith".into(),
            ..GroupRecord::default()
        };
        group.members.insert(
            "angel-c".into(),
            MemberRecord {
                name: "Angel C.".into(),
                is_out: false,
            },
        );
        let mut data = AppData::default();
        data.groups.insert("smith".into(), group);
        data
    }

    #[tokio::test]
    async fn missing_file_loads_empty_document() {
        let data = load_data(&temp_path("missing")).await;
        assert_eq!(data, AppData::default());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty_document() {
        let path = temp_path("corrupt");
        fs::write(&path, b"{not json").await.unwrap();
        assert_eq!(load_data(&path).await, AppData::default());
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn persisted_document_reloads() {
        let path = temp_path("reload");
        let data = one_member_group();
        persist_data(&path, &data).await.unwrap();
        assert_eq!(load_data(&path).await, data);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn record_and_clear_status_cache() {
        let file = StateFile::in_memory(one_member_group());
        let status = BTreeMap::from([("angel-c".to_string(), true)]);
        file.record_status("smith", &status).await;
        assert!(file.lock().await.groups["smith"].members["angel-c"].is_out);

        file.clear_status().await;
        assert!(!file.lock().await.groups["smith"].members["angel-c"].is_out);
    }

    #[tokio::test]
    async fn unwritable_path_reports_store_unavailable() {
        let path = std::env::temp_dir().join("hall_pass_no_such_dir").join("nested").join("state.json");
        let err = persist_data(&path, &AppData::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
    }
}
