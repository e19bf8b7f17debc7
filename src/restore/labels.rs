//! Label reconciliation
//!
//! Sorts the archived labels so parents precede children, then maps
//! each one onto the remote account: system labels map by id, the
//! rest match by case-insensitive name or get recreated. A fresh
//! "Import ..." label tags everything brought in by this run.

use crate::client::{Client, ClientBuilder};
use crate::error::{Error, Result};
use crate::export::LABELS_FILE_NAME;
use crate::fileio::VersionedJson;
use crate::restore::RestoreTask;
use crate::types::{CreateLabelReq, LABEL_FILE_VERSION, Label, LabelId, LabelType};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

const IMPORT_LABEL_COLOR: &str = "#f66";

impl<B: ClientBuilder> RestoreTask<'_, B> {
    /// Build the backup-to-remote label mapping and create the import
    /// label. Returns the import label id.
    pub(crate) async fn restore_labels(&mut self) -> Result<LabelId> {
        let backup_labels = sort_labels(self.read_label_file()?)?;

        let client = Arc::clone(self.session.client()?);
        let remote_labels = client
            .get_labels(
                &self.cancel,
                &[LabelType::Folder, LabelType::Label, LabelType::System],
            )
            .await?;

        // Case-insensitive collision set, kept current as labels are
        // created.
        let mut taken_names: HashSet<String> = remote_labels
            .iter()
            .map(|label| label.name.to_lowercase())
            .collect();

        for label in backup_labels {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if label.id.is_system() {
                self.label_mapping.insert(label.id.clone(), label.id);
                continue;
            }

            let matched = remote_labels
                .iter()
                .find(|remote| remote.name.eq_ignore_ascii_case(&label.name));

            match matched {
                Some(remote) if remote.label_type == label.label_type => {
                    self.label_mapping
                        .insert(label.id.clone(), remote.id.clone());
                }
                Some(_) => {
                    // Same name, different type: find a free "<name> (N)".
                    let name = next_free_name(&label.name, &taken_names);
                    let created = self
                        .create_remote_label(client.as_ref(), &label, name.clone())
                        .await?;
                    taken_names.insert(name.to_lowercase());
                    info!(backup = %label.id, remote = %created.id, "recreated label under a new name");
                    self.label_mapping.insert(label.id.clone(), created.id);
                }
                None => {
                    let name = label.name.clone();
                    let created = self
                        .create_remote_label(client.as_ref(), &label, name.clone())
                        .await?;
                    taken_names.insert(name.to_lowercase());
                    info!(backup = %label.id, remote = %created.id, "recreated label");
                    self.label_mapping.insert(label.id.clone(), created.id);
                }
            }
        }

        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let import_label = client
            .create_label(
                &self.cancel,
                &CreateLabelReq {
                    name: format!("Import {stamp}"),
                    color: IMPORT_LABEL_COLOR.to_string(),
                    label_type: LabelType::Label,
                    parent_id: None,
                },
            )
            .await?;

        Ok(import_label.id)
    }

    fn read_label_file(&self) -> Result<Vec<Label>> {
        let bytes = std::fs::read(self.backup_dir.join(LABELS_FILE_NAME))?;
        Ok(VersionedJson::<Vec<Label>>::from_bytes(LABEL_FILE_VERSION, &bytes)?.payload)
    }

    async fn create_remote_label(
        &self,
        client: &impl Client,
        label: &Label,
        name: String,
    ) -> Result<Label> {
        // Topological order guarantees the parent is already mapped.
        let parent_id = match &label.parent_id {
            None => None,
            Some(parent) => Some(
                self.label_mapping
                    .get(parent)
                    .cloned()
                    .ok_or_else(|| Error::LabelMappingNotFound(parent.clone()))?,
            ),
        };

        client
            .create_label(
                &self.cancel,
                &CreateLabelReq {
                    name,
                    color: label.color.clone(),
                    label_type: label.label_type,
                    parent_id,
                },
            )
            .await
    }
}

/// Sort labels so every parent precedes its children.
///
/// Runs fixed-point passes over the unplaced remainder; a pass that
/// places nothing means a parent cycle (or a dangling parent
/// reference).
pub(crate) fn sort_labels(labels: Vec<Label>) -> Result<Vec<Label>> {
    let mut result: Vec<Label> = Vec::with_capacity(labels.len());
    let mut placed: HashSet<LabelId> = HashSet::with_capacity(labels.len());
    let mut remaining: Vec<Label> = Vec::new();

    for label in labels {
        match &label.parent_id {
            None => {
                placed.insert(label.id.clone());
                result.push(label);
            }
            Some(parent) if placed.contains(parent) => {
                placed.insert(label.id.clone());
                result.push(label);
            }
            Some(_) => remaining.push(label),
        }
    }

    while !remaining.is_empty() {
        let before = remaining.len();
        let mut next_remaining = Vec::new();

        for label in remaining {
            let parent_placed = label
                .parent_id
                .as_ref()
                .is_some_and(|parent| placed.contains(parent));
            if parent_placed {
                placed.insert(label.id.clone());
                result.push(label);
            } else {
                next_remaining.push(label);
            }
        }

        if next_remaining.len() == before {
            return Err(Error::CircularLabelReference);
        }
        remaining = next_remaining;
    }

    Ok(result)
}

/// Lowest `N >= 1` such that `"<base> (N)"` does not collide
/// case-insensitively with a taken name.
fn next_free_name(base: &str, taken: &HashSet<String>) -> String {
    let mut n = 1usize;
    loop {
        let candidate = format!("{base} ({n})");
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
