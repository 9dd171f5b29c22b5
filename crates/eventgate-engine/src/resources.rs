//! The `applyResources` side effect.
//!
//! Renders every manifest template under a bundle directory against the
//! caller's variables and hands the results to the resource sink.
//! Rendering is all-or-nothing: one bad template aborts the call before
//! any resource is created. Creation is best-effort in order — the
//! first failure stops the remaining applies, and already-created
//! resources are left for orchestrator reconciliation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::context::EngineContext;
use crate::errors::ApplyError;
use crate::names::kind_to_plural;
use crate::template;
use crate::value::Value;

/// Label attached to every created resource, valued with the call's
/// job ID.
pub const JOBID_LABEL: &str = "kabanero.io/jobid";

/// Addressing data extracted from a manifest.
#[derive(Debug, PartialEq, Eq)]
pub struct ManifestMeta {
    pub group: String,
    pub version: String,
    /// Plural resource name derived from the kind.
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

pub(crate) async fn apply_resources(
    ctx: &EngineContext,
    dir: &str,
    vars: &BTreeMap<String, Value>,
) -> Result<(), ApplyError> {
    let root = eventgate_bundle::merge_path(&ctx.bundle_root, Path::new(dir)).map_err(|e| {
        ApplyError::Path {
            message: e.to_string(),
        }
    })?;

    let mut files = Vec::new();
    collect_manifests(&root, &mut files).map_err(|e| ApplyError::Io {
        message: format!("failed to enumerate {}: {e}", root.display()),
    })?;
    files.sort();

    // Stage every rendering before creating anything.
    let mut rendered = Vec::with_capacity(files.len());
    for path in files {
        let text = std::fs::read_to_string(&path).map_err(|e| ApplyError::Io {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        let output = template::render(&text, vars).map_err(|e| ApplyError::Render {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;
        rendered.push((path, output));
    }

    if ctx.dryrun {
        tracing::info!(
            dir = %root.display(),
            manifests = rendered.len(),
            "dryrun is set, resources not created"
        );
        return Ok(());
    }

    let sink = ctx.sink.as_ref().ok_or(ApplyError::NoSink)?;
    let jobid = ctx.job_ids.next().await;

    for (path, manifest) in rendered {
        let file = path.display().to_string();
        let (meta, bytes) = prepare_manifest(&file, &manifest, &jobid)?;
        tracing::info!(
            group = %meta.group,
            resource = %meta.resource,
            namespace = %meta.namespace,
            name = %meta.name,
            jobid = %jobid,
            "creating resource"
        );
        sink.create(&bytes).await.map_err(|e| ApplyError::Create {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

/// Decode one rendered manifest, reject it if it has no namespace,
/// attach the job-ID label, and re-serialize for the sink.
pub(crate) fn prepare_manifest(
    file: &str,
    manifest: &str,
    jobid: &str,
) -> Result<(ManifestMeta, Vec<u8>), ApplyError> {
    let mut decoded: serde_json::Value =
        serde_yaml::from_str(manifest).map_err(|e| ApplyError::Manifest {
            file: file.to_string(),
            message: e.to_string(),
        })?;

    let meta = manifest_meta(file, &decoded)?;
    set_jobid_label(file, &mut decoded, jobid)?;

    let bytes = serde_json::to_vec(&decoded).map_err(|e| ApplyError::Manifest {
        file: file.to_string(),
        message: e.to_string(),
    })?;
    Ok((meta, bytes))
}

fn manifest_meta(file: &str, decoded: &serde_json::Value) -> Result<ManifestMeta, ApplyError> {
    let field = |path: &str, value: Option<&serde_json::Value>| -> Result<String, ApplyError> {
        value
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApplyError::Manifest {
                file: file.to_string(),
                message: format!("missing or non-string '{path}'"),
            })
    };

    let api_version = field("apiVersion", decoded.get("apiVersion"))?;
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.clone()),
    };
    if version.is_empty() || version.contains('/') {
        return Err(ApplyError::Manifest {
            file: file.to_string(),
            message: format!("invalid apiVersion '{api_version}'"),
        });
    }

    let kind = field("kind", decoded.get("kind"))?;
    let metadata = decoded.get("metadata");
    let name = field("metadata.name", metadata.and_then(|m| m.get("name")))?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApplyError::MissingNamespace {
            file: file.to_string(),
        })?;

    Ok(ManifestMeta {
        group,
        version,
        resource: kind_to_plural(&kind),
        namespace,
        name,
    })
}

fn set_jobid_label(
    file: &str,
    decoded: &mut serde_json::Value,
    jobid: &str,
) -> Result<(), ApplyError> {
    let metadata = decoded
        .get_mut("metadata")
        .and_then(serde_json::Value::as_object_mut)
        .ok_or_else(|| ApplyError::Manifest {
            file: file.to_string(),
            message: "metadata is not a mapping".into(),
        })?;

    let labels = metadata
        .entry("labels")
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    let labels = labels
        .as_object_mut()
        .ok_or_else(|| ApplyError::Manifest {
            file: file.to_string(),
            message: "metadata.labels is not a mapping".into(),
        })?;
    labels.insert(
        JOBID_LABEL.to_string(),
        serde_json::Value::String(jobid.to_string()),
    );
    Ok(())
}

fn collect_manifests(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_manifests(&path, files)?;
            continue;
        }
        if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}
