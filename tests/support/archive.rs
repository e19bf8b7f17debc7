//! Helpers that lay out backup directories for restore tests.

use mailvault::fileio::VersionedJson;
use mailvault::types::{
    ArchivedMetadata, Header, LABEL_FILE_VERSION, Label, LabelId, MESSAGE_METADATA_VERSION,
    MessageId, WriterType,
};
use std::fs;
use std::path::Path;

pub fn write_labels_file(dir: &Path, labels: &[Label]) {
    let bytes = VersionedJson::new(LABEL_FILE_VERSION, labels)
        .to_bytes()
        .expect("serialize labels");
    fs::write(dir.join("labels.json"), bytes).expect("write labels.json");
}

pub fn label(id: &str, name: &str, label_type: mailvault::types::LabelType) -> Label {
    Label {
        id: LabelId::from(id),
        name: name.to_string(),
        color: "#abc".to_string(),
        label_type,
        parent_id: None,
    }
}

/// Write a `<id>.eml` + `<id>.metadata.json` pair as the export's
/// write stage would for a fully built message.
pub fn write_archived_message(
    dir: &Path,
    id: &str,
    time: i64,
    subject: &str,
    body: &str,
    label_ids: &[&str],
) {
    let eml = format!(
        "From: Sender <user@example.com>\r\n\
         To: You <you@example.com>\r\n\
         Subject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}"
    );
    fs::write(dir.join(format!("{id}.eml")), eml).expect("write eml");

    let metadata = ArchivedMetadata {
        id: MessageId::from(id),
        address_id: "addr-1".into(),
        label_ids: label_ids.iter().map(|l| (*l).into()).collect(),
        subject: subject.to_string(),
        unread: false,
        flags: 0,
        time,
        size: body.len() as u64,
        mime_type: "text/plain".to_string(),
        headers: vec![Header {
            name: "Subject".to_string(),
            value: subject.to_string(),
        }],
        attachments: vec![],
        writer_type: WriterType::DecryptedAndBuilt,
    };

    let bytes = VersionedJson::new(MESSAGE_METADATA_VERSION, &metadata)
        .to_bytes()
        .expect("serialize metadata");
    fs::write(dir.join(format!("{id}.metadata.json")), bytes).expect("write metadata");
}
