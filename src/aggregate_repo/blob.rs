// BLOB version prefix helpers. [version: u8][payload].

pub(crate) const BLOB_VERSION: u8 = 1;

pub(crate) fn with_version_prefix(version: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(version);
    out.extend_from_slice(&payload);
    out
}

/// Payload after the version byte. Unknown versions are corrupt data, not legacy rows.
pub(crate) fn blob_payload(bytes: &[u8], expected_version: u8) -> anyhow::Result<&[u8]> {
    match bytes.split_first() {
        Some((&version, payload)) if version == expected_version => Ok(payload),
        Some((&version, _)) => anyhow::bail!(
            "unsupported blob version {} (expected {})",
            version,
            expected_version
        ),
        None => anyhow::bail!("empty blob"),
    }
}
