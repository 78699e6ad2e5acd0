use docsync_db::content::models::{AttachmentRow, LinkRow};

use crate::source::models::SourceRecord;
use crate::transfer::VERSION_DATA_URL;

/// Definition of one replicated object: what to query, which fields a record
/// must carry, and how it maps to a sink row.
pub trait SyncStream: Send + Sync {
    type Row: Send + Sync + 'static;

    /// Watermark key of the stream.
    fn name(&self) -> &'static str;
    fn object(&self) -> &'static str;
    fn fields(&self) -> &'static [&'static str];
    /// Whether every record needs its payload transferred before it is
    /// written.
    fn requires_payload(&self) -> bool;

    /// Required fields absent from `record`, in reporting order.
    fn missing_fields(&self, record: &SourceRecord) -> Vec<&'static str>;

    fn to_row(
        &self,
        record: &SourceRecord,
        transfer_reference: Option<&str>,
    ) -> Result<Self::Row, String>;
}

/// `"Skipped: No Id. No SystemModstamp."`
pub fn missing_data_message(missing: &[&str]) -> String {
    let reasons: Vec<String> = missing.iter().map(|f| format!("No {f}.")).collect();
    format!("Skipped: {}", reasons.join(" "))
}

pub struct ContentVersionStream;

const CONTENT_VERSION_FIELDS: &[&str] = &[
    "Id",
    "ContentDocumentId",
    "IsLatest",
    "ContentUrl",
    "ContentBodyId",
    "VersionNumber",
    "Title",
    "Description",
    "ReasonForChange",
    "SharingOption",
    "SharingPrivacy",
    "PathOnClient",
    "RatingCount",
    "IsDeleted",
    "ContentModifiedDate",
    "ContentModifiedById",
    "PositiveRatingCount",
    "NegativeRatingCount",
    "FeaturedContentBoost",
    "FeaturedContentDate",
    "OwnerId",
    "CreatedById",
    "CreatedDate",
    "LastModifiedById",
    "LastModifiedDate",
    "SystemModstamp",
    "TagCsv",
    "FileType",
    "PublishStatus",
    "ContentSize",
    "FileExtension",
    "FirstPublishLocationId",
    "Origin",
    "NetworkId",
    "ContentLocation",
    "TextPreview",
    "ExternalDocumentInfo1",
    "ExternalDocumentInfo2",
    "Checksum",
    "IsMajorVersion",
    "IsAssetEnabled",
    "VersionDataUrl",
];

impl SyncStream for ContentVersionStream {
    type Row = AttachmentRow;

    fn name(&self) -> &'static str {
        "ContentVersionSync"
    }

    fn object(&self) -> &'static str {
        "ContentVersion"
    }

    fn fields(&self) -> &'static [&'static str] {
        CONTENT_VERSION_FIELDS
    }

    fn requires_payload(&self) -> bool {
        true
    }

    fn missing_fields(&self, record: &SourceRecord) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if record.id().is_none() {
            missing.push("Id");
        }
        if record.text(VERSION_DATA_URL).is_none() {
            missing.push(VERSION_DATA_URL);
        }
        if record.content_document_id().is_none() {
            missing.push("ContentDocumentId");
        }
        if !record.has_modstamp() {
            missing.push("SystemModstamp");
        }
        missing
    }

    fn to_row(
        &self,
        record: &SourceRecord,
        transfer_reference: Option<&str>,
    ) -> Result<AttachmentRow, String> {
        let content_document_id = record
            .content_document_id()
            .ok_or_else(|| "no ContentDocumentId".to_string())?;
        let content_version_id = record.id().ok_or_else(|| "no Id".to_string())?;

        Ok(AttachmentRow {
            content_document_id: content_document_id.to_string(),
            content_version_id: content_version_id.to_string(),
            title: record.text("Title").map(str::to_string),
            file_extension: record.text("FileExtension").map(str::to_string),
            blob_url: transfer_reference.map(str::to_string),
            system_modstamp: record.modified(),
        })
    }
}

pub struct ContentDocumentLinkStream;

const CONTENT_DOCUMENT_LINK_FIELDS: &[&str] = &[
    "Id",
    "LinkedEntityId",
    "ContentDocumentId",
    "IsDeleted",
    "SystemModstamp",
    "ShareType",
    "Visibility",
];

impl SyncStream for ContentDocumentLinkStream {
    type Row = LinkRow;

    fn name(&self) -> &'static str {
        "ContentDocumentLinkSync"
    }

    fn object(&self) -> &'static str {
        "ContentDocumentLink"
    }

    fn fields(&self) -> &'static [&'static str] {
        CONTENT_DOCUMENT_LINK_FIELDS
    }

    fn requires_payload(&self) -> bool {
        false
    }

    fn missing_fields(&self, record: &SourceRecord) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if record.id().is_none() {
            missing.push("Id");
        }
        if record.content_document_id().is_none() {
            missing.push("ContentDocumentId");
        }
        if !record.has_modstamp() {
            missing.push("SystemModstamp");
        }
        missing
    }

    fn to_row(
        &self,
        record: &SourceRecord,
        _transfer_reference: Option<&str>,
    ) -> Result<LinkRow, String> {
        let id = record.id().ok_or_else(|| "no Id".to_string())?;
        let content_document_id = record
            .content_document_id()
            .ok_or_else(|| "no ContentDocumentId".to_string())?;
        let system_modstamp = record.modified().ok_or_else(|| {
            format!(
                "unparseable SystemModstamp {}",
                record.system_modstamp.clone().unwrap_or_default()
            )
        })?;

        Ok(LinkRow {
            id: id.to_string(),
            linked_entity_id: record.text("LinkedEntityId").map(str::to_string),
            content_document_id: content_document_id.to_string(),
            is_deleted: record.flag("IsDeleted").unwrap_or(false),
            system_modstamp,
            share_type: record.text("ShareType").map(str::to_string),
            visibility: record.text("Visibility").map(str::to_string),
        })
    }
}
