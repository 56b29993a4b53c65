use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Multipart;
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Extension;
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::err::Error;
use crate::models::Registration;
use crate::store::{RecordStore, UploadStore};
use crate::templates::{html_escape, render_file};
use crate::AppState;

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, Default)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, FilePart>,
}

#[derive(Debug)]
pub struct FilePart {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A submission that has passed every validation step and is ready to persist.
#[derive(Debug)]
pub struct ValidSubmission {
    pub first_name: String,
    pub last_name: String,
    pub id_type: String,
    pub front: FilePart,
    pub back: FilePart,
}

/// POST /register
pub async fn handle_register(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Option<Multipart>,
) -> Result<Response, Error> {
    if !headers.contains_key(header::CONTENT_TYPE) {
        return Ok(redirect_with_error("Missing Content-Type header."));
    }
    // A non-multipart body yields no fields, which fails the same
    // required-field check an empty form would.
    let form = match multipart {
        Some(multipart) => read_form(multipart).await.unwrap_or_default(),
        None => FormData::default(),
    };
    let submission = match validate(form) {
        Ok(submission) => submission,
        Err(message) => return Ok(redirect_with_error(message)),
    };
    let record = match persist(&state, &submission).await {
        Ok(record) => record,
        Err(message) => return Ok(redirect_with_error(message)),
    };

    log::info!(
        "registered {} {} ({})",
        record.first_name,
        record.last_name,
        record.id_type
    );
    let page = render_file(
        &state.template_dir,
        "success.html",
        &[
            ("first_name", &html_escape(&record.first_name)),
            ("last_name", &html_escape(&record.last_name)),
        ],
    )
    .await?;
    Ok(Html(page).into_response())
}

/// 303 back to the form with the message in the `error` query parameter.
pub fn redirect_with_error(message: &str) -> Response {
    Redirect::to(&format!("/?error={}", urlencoding::encode(message))).into_response()
}

/// Drain a multipart body into named text fields and file parts.
async fn read_form(mut multipart: Multipart) -> anyhow::Result<FormData> {
    let mut form = FormData::default();
    while let Some(field) = multipart.next_field().await? {
        let name = match field.name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let filename = field.file_name().map(ToString::to_string);
        match filename {
            Some(filename) => {
                let bytes = field.bytes().await?.to_vec();
                form.files.insert(name, FilePart { filename, bytes });
            }
            None => {
                form.fields.insert(name, field.text().await?);
            }
        }
    }
    Ok(form)
}

/// Run the validation steps in order, yielding the message for the first
/// failure.
pub fn validate(mut form: FormData) -> Result<ValidSubmission, &'static str> {
    let required = |form: &FormData, name: &str| -> Option<String> {
        let value = form.fields.get(name)?.trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    let first_name = required(&form, "first_name");
    let last_name = required(&form, "last_name");
    let id_type = required(&form, "id_type");
    let (Some(first_name), Some(last_name), Some(id_type)) = (first_name, last_name, id_type)
    else {
        return Err("Please complete all required fields.");
    };

    let front = match form.files.remove("id_front") {
        Some(file) if !file.filename.is_empty() => file,
        _ => return Err("Please upload a valid front image file."),
    };
    let back = match form.files.remove("id_back") {
        Some(file) if !file.filename.is_empty() => file,
        _ => return Err("Please upload a valid back image file."),
    };
    if !extension_allowed(&front.filename) {
        return Err("Front image must be a PNG/JPG/JPEG/GIF file.");
    }
    if !extension_allowed(&back.filename) {
        return Err("Back image must be a PNG/JPG/JPEG/GIF file.");
    }

    Ok(ValidSubmission {
        first_name,
        last_name,
        id_type,
        front,
        back,
    })
}

/// Save both files and append the record, cleaning up the files if the
/// record append fails.
pub async fn persist(
    state: &AppState,
    submission: &ValidSubmission,
) -> Result<Registration, &'static str> {
    let now = Utc::now();
    let token = Uuid::new_v4().simple().to_string();
    let front_filename = storage_filename(now, &token, "front", &submission.front.filename);
    let back_filename = storage_filename(now, &token, "back", &submission.back.filename);

    let saves = [
        (&front_filename, &submission.front.bytes),
        (&back_filename, &submission.back.bytes),
    ];
    for (name, bytes) in saves {
        if let Err(err) = state.uploads.save(name, bytes).await {
            log::error!("failed to save upload {name}: {err:#}");
            return Err("Failed to save uploaded files.");
        }
    }

    let record = Registration {
        timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
        first_name: submission.first_name.clone(),
        last_name: submission.last_name.clone(),
        id_type: submission.id_type.clone(),
        front_filename,
        back_filename,
    };
    if let Err(err) = state.records.append(&record).await {
        log::error!("failed to append registration record: {err:#}");
        for name in [&record.front_filename, &record.back_filename] {
            if let Err(err) = state.uploads.remove(name).await {
                log::warn!("failed to clean up upload {name}: {err:#}");
            }
        }
        return Err("Failed to record registration data.");
    }
    Ok(record)
}

/// Case-insensitive check against the allowed image extensions.
pub fn extension_allowed(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// Collision-resistant storage name: timestamp, unique token, side marker,
/// then the original name with any directory components stripped.
pub fn storage_filename(now: DateTime<Utc>, token: &str, side: &str, original: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        now.format("%Y%m%d_%H%M%S_%6f"),
        token,
        side,
        base_name(original)
    )
}

/// Last path component of an uploaded filename; handles both separator
/// styles since browsers on some platforms send full client paths.
fn base_name(filename: &str) -> &str {
    match filename.rfind(['/', '\\']) {
        Some(idx) => &filename[idx + 1..],
        None => filename,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RecordStore, UploadStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn form(
        fields: &[(&str, &str)],
        files: &[(&str, &str)],
    ) -> FormData {
        FormData {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: files
                .iter()
                .map(|(k, name)| {
                    (
                        k.to_string(),
                        FilePart {
                            filename: name.to_string(),
                            bytes: b"img".to_vec(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn complete_form() -> FormData {
        form(
            &[
                ("first_name", "Ana"),
                ("last_name", "Lee"),
                ("id_type", "passport"),
            ],
            &[("id_front", "a.png"), ("id_back", "b.jpg")],
        )
    }

    #[test]
    fn allowed_extensions_are_case_insensitive() {
        assert!(extension_allowed("x.png"));
        assert!(extension_allowed("x.JPEG"));
        assert!(extension_allowed(".gif"));
        assert!(!extension_allowed("x.pdf"));
        assert!(!extension_allowed("noext"));
        assert!(!extension_allowed("trailing."));
    }

    #[test]
    fn valid_form_passes() {
        let submission = validate(complete_form()).unwrap();
        assert_eq!(submission.first_name, "Ana");
        assert_eq!(submission.id_type, "passport");
    }

    #[test]
    fn whitespace_only_fields_are_rejected() {
        let mut f = complete_form();
        f.fields.insert("first_name".to_string(), "   ".to_string());
        assert_eq!(
            validate(f).unwrap_err(),
            "Please complete all required fields."
        );
    }

    #[test]
    fn missing_file_parts_get_field_specific_messages() {
        let mut f = complete_form();
        f.files.remove("id_front");
        assert_eq!(
            validate(f).unwrap_err(),
            "Please upload a valid front image file."
        );

        let mut f = complete_form();
        f.files.get_mut("id_back").unwrap().filename = String::new();
        assert_eq!(
            validate(f).unwrap_err(),
            "Please upload a valid back image file."
        );
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let mut f = complete_form();
        f.files.get_mut("id_front").unwrap().filename = "scan.pdf".to_string();
        assert_eq!(
            validate(f).unwrap_err(),
            "Front image must be a PNG/JPG/JPEG/GIF file."
        );
    }

    #[test]
    fn storage_filename_strips_directories_and_embeds_side() {
        let now = Utc::now();
        let name = storage_filename(now, "tok", "front", "/etc/../photo.png");
        assert!(name.ends_with("_tok_front_photo.png"));
        let name = storage_filename(now, "tok", "back", r"C:\Users\me\id.jpg");
        assert!(name.ends_with("_tok_back_id.jpg"));
        let name = storage_filename(now, "tok", "front", "plain.png");
        assert!(name.ends_with("_tok_front_plain.png"));
    }

    #[test]
    fn storage_filenames_are_unique_across_submissions() {
        let now = Utc::now();
        let a = storage_filename(now, &Uuid::new_v4().simple().to_string(), "front", "p.png");
        let b = storage_filename(now, &Uuid::new_v4().simple().to_string(), "front", "p.png");
        assert_ne!(a, b);
    }

    #[derive(Default)]
    struct MemRecordStore {
        rows: Mutex<Vec<Registration>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for MemRecordStore {
        async fn append(&self, record: &Registration) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list_all(&self) -> anyhow::Result<Vec<Registration>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct MemUploadStore {
        files: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UploadStore for MemUploadStore {
        async fn save(&self, name: &str, _bytes: &[u8]) -> anyhow::Result<()> {
            self.files.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn remove(&self, name: &str) -> anyhow::Result<()> {
            self.files.lock().unwrap().retain(|f| f != name);
            Ok(())
        }
    }

    fn mem_state(records_fail: bool) -> (AppState, Arc<MemRecordStore>, Arc<MemUploadStore>) {
        let records = Arc::new(MemRecordStore {
            fail: records_fail,
            ..Default::default()
        });
        let uploads = Arc::new(MemUploadStore::default());
        let state = AppState {
            records: records.clone(),
            uploads: uploads.clone(),
            template_dir: "templates".into(),
            static_dir: "static".into(),
            upload_dir: "uploads".into(),
        };
        (state, records, uploads)
    }

    #[tokio::test]
    async fn persist_saves_two_files_and_one_record() {
        let (state, records, uploads) = mem_state(false);
        let submission = validate(complete_form()).unwrap();
        let record = persist(&state, &submission).await.unwrap();

        let files = uploads.files.lock().unwrap().clone();
        assert_eq!(files.len(), 2);
        assert!(files.contains(&record.front_filename));
        assert!(files.contains(&record.back_filename));
        assert_eq!(records.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persist_cleans_up_files_when_append_fails() {
        let (state, _, uploads) = mem_state(true);
        let submission = validate(complete_form()).unwrap();
        let err = persist(&state, &submission).await.unwrap_err();
        assert_eq!(err, "Failed to record registration data.");
        assert!(uploads.files.lock().unwrap().is_empty());
    }
}
