//! Dataset submissions: drafts, datasheet fields, and the submit call.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::api::{require_non_empty, ApiClient};
use crate::error::DataCollectiveError;
use crate::upload::{upload_dataset_file, UploadOptions};

/// Payload for `POST /datasets/submission`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmissionDraft {
    pub name: String,
    pub long_description: String,
}

impl SubmissionDraft {
    pub fn new(
        name: impl Into<String>,
        long_description: impl Into<String>,
    ) -> Result<Self, DataCollectiveError> {
        Self {
            name: name.into(),
            long_description: long_description.into(),
        }
        .validated()
    }

    /// Trim every field and reject blank ones.
    pub fn validated(mut self) -> Result<Self, DataCollectiveError> {
        trim_required(&mut self.name, "name")?;
        trim_required(&mut self.long_description, "longDescription")?;
        Ok(self)
    }
}

/// The only status a client may submit with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Submitted,
}

/// Datasheet fields sent with `POST /datasets/submission/{id}/submit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmissionFields {
    pub short_description: String,
    pub long_description: String,
    pub locale: String,
    pub task: String,
    pub format: String,
    pub license_abbreviation: String,
    pub license: String,
    pub license_url: String,
    pub other: String,
    pub restrictions: String,
    pub forbidden_usage: String,
    pub additional_conditions: String,
    pub point_of_contact_full_name: String,
    pub point_of_contact_email: String,
    pub funded_by_full_name: String,
    pub funded_by_email: String,
    pub legal_contact_full_name: String,
    pub legal_contact_email: String,
    pub created_by_full_name: String,
    pub created_by_email: String,
    pub intended_usage: String,
    pub ethical_review_process: String,
    pub exclusivity_opt_out: bool,
    #[serde(default)]
    pub file_upload_id: Option<String>,
    #[serde(default)]
    pub status: SubmissionStatus,
}

impl SubmissionFields {
    /// Parse datasheet fields from JSON, rejecting unknown keys and blank values.
    pub fn from_json(text: &str) -> Result<Self, DataCollectiveError> {
        let fields: Self = serde_json::from_str(text).map_err(|err| {
            DataCollectiveError::InvalidArgument(format!("invalid submission fields: {err}"))
        })?;
        fields.validated()
    }

    /// Read and validate datasheet fields from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, DataCollectiveError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Trim every string field and reject blank ones.
    pub fn validated(mut self) -> Result<Self, DataCollectiveError> {
        for (name, value) in self.required_strings() {
            trim_required(value, name)?;
        }
        if let Some(id) = self.file_upload_id.as_mut() {
            trim_required(id, "fileUploadId")?;
        }
        Ok(self)
    }

    fn required_strings(&mut self) -> [(&'static str, &mut String); 22] {
        [
            ("shortDescription", &mut self.short_description),
            ("longDescription", &mut self.long_description),
            ("locale", &mut self.locale),
            ("task", &mut self.task),
            ("format", &mut self.format),
            ("licenseAbbreviation", &mut self.license_abbreviation),
            ("license", &mut self.license),
            ("licenseUrl", &mut self.license_url),
            ("other", &mut self.other),
            ("restrictions", &mut self.restrictions),
            ("forbiddenUsage", &mut self.forbidden_usage),
            ("additionalConditions", &mut self.additional_conditions),
            ("pointOfContactFullName", &mut self.point_of_contact_full_name),
            ("pointOfContactEmail", &mut self.point_of_contact_email),
            ("fundedByFullName", &mut self.funded_by_full_name),
            ("fundedByEmail", &mut self.funded_by_email),
            ("legalContactFullName", &mut self.legal_contact_full_name),
            ("legalContactEmail", &mut self.legal_contact_email),
            ("createdByFullName", &mut self.created_by_full_name),
            ("createdByEmail", &mut self.created_by_email),
            ("intendedUsage", &mut self.intended_usage),
            ("ethicalReviewProcess", &mut self.ethical_review_process),
        ]
    }
}

fn trim_required(value: &mut String, field: &str) -> Result<(), DataCollectiveError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DataCollectiveError::InvalidArgument(format!(
            "`{field}` must be a non-empty string"
        )));
    }
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
    Ok(())
}

/// Response of the submission endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_upload_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Create a draft submission.
pub fn create_submission_draft(
    client: &ApiClient,
    draft: &SubmissionDraft,
) -> Result<SubmissionResponse, DataCollectiveError> {
    let draft = draft.clone().validated()?;
    let payload = serde_json::to_value(&draft)
        .map_err(|err| DataCollectiveError::InvalidArgument(err.to_string()))?;
    client.post_json(&["datasets", "submission"], payload)
}

/// Submit a draft for review with its datasheet fields.
pub fn submit_submission(
    client: &ApiClient,
    submission_id: &str,
    fields: &SubmissionFields,
) -> Result<SubmissionResponse, DataCollectiveError> {
    require_non_empty(submission_id, "submission_id")?;
    let fields = fields.clone().validated()?;
    let payload = serde_json::to_value(&fields)
        .map_err(|err| DataCollectiveError::InvalidArgument(err.to_string()))?;
    client.post_json(
        &["datasets", "submission", submission_id.trim(), "submit"],
        payload,
    )
}

/// Create a draft, upload the archive for it, and submit it.
///
/// `fields.file_upload_id`, when set, must name the upload that this call
/// completes.
pub fn create_submission_with_upload(
    client: &ApiClient,
    file_path: &Path,
    draft: &SubmissionDraft,
    fields: &SubmissionFields,
    mime_type: &str,
    options: &UploadOptions,
) -> Result<SubmissionResponse, DataCollectiveError> {
    let mut fields = fields.clone().validated()?;

    let created = create_submission_draft(client, draft)?;
    let submission_id = created
        .submission_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            DataCollectiveError::protocol(
                "datasets/submission",
                "Draft creation did not return a submissionId",
            )
        })?;
    tracing::info!(submission = %submission_id, "Created submission draft");

    let upload = upload_dataset_file(client, file_path, &submission_id, mime_type, options)?;

    if let Some(requested) = fields.file_upload_id.as_deref() {
        if requested != upload.file_upload_id {
            return Err(DataCollectiveError::InvalidArgument(
                "`fileUploadId` does not match the completed upload".to_string(),
            ));
        }
    }
    fields.file_upload_id = Some(upload.file_upload_id.clone());

    let mut response = submit_submission(client, &submission_id, &fields)?;
    response
        .file_upload_id
        .get_or_insert_with(|| upload.file_upload_id.clone());
    response.submission_id.get_or_insert(submission_id);
    Ok(response)
}
