// Zip entry names for AFF4 resources
//
// Volumes store `aff4://` identifiers with the scheme separator escaped
// (`aff4%3A%2F%2F`); some writers strip the volume prefix or a leading '/'.

use percent_encoding::percent_decode_str;

const AFF4_SCHEME: &str = "aff4://";
const AFF4_SCHEME_ENCODED: &str = "aff4%3A%2F%2F";

/// Escape every `aff4://` scheme separator for use as a zip entry name
pub fn encode(url: &str) -> String {
    url.replace(AFF4_SCHEME, AFF4_SCHEME_ENCODED)
}

/// Percent-decode an entry name; invalid UTF-8 leaves the input unchanged
pub fn decode(path: &str) -> String {
    percent_decode_str(path)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Turn a resource name into the entry name used inside the volume `volume_id`
///
/// Leading slashes and the volume prefix (plain or encoded) are removed and
/// any remaining scheme separators are escaped.
pub fn sanitize(resource: &str, volume_id: &str) -> String {
    let mut res = resource.trim_start_matches('/');
    let encoded_volume = encode(volume_id);
    if !volume_id.is_empty() {
        if let Some(rest) = res.strip_prefix(volume_id) {
            res = rest;
        } else if let Some(rest) = res.strip_prefix(encoded_volume.as_str()) {
            res = rest;
        }
    }
    encode(res).trim_start_matches('/').to_string()
}
