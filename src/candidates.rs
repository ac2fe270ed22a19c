//! Base-URL candidate resolution for device login.
//!
//! The appliance's north-bound API ("NBI") lives at a handful of well-known
//! scheme/port/path combinations that vary across firmware generations. Login
//! probes them in a fixed priority order and sticks with whichever one
//! answers. An operator can bypass discovery entirely by supplying an explicit
//! base-URL override, which is expanded into its versioned and unversioned
//! forms so either spelling works.

/// Produce the ordered list of base URLs to attempt for login.
///
/// With an `override_url`, returns up to three variants of it (as given,
/// without a trailing `/v1`, with `/v1` appended), de-duplicated in
/// first-seen order. Without one, returns the fixed probe order for
/// `address`: newer firmwares serve the versioned path, older ones the bare
/// one, and the plain HTTP management port is tried first because it answers
/// fastest when present.
pub fn resolve_candidates(address: &str, override_url: Option<&str>) -> Vec<String> {
    if let Some(raw) = override_url {
        let normalized = raw.trim().trim_end_matches('/').to_string();
        let without_v1 = normalized
            .strip_suffix("/v1")
            .map(ToString::to_string)
            .unwrap_or_else(|| normalized.clone());
        let with_v1 = format!("{without_v1}/v1");

        let mut out: Vec<String> = Vec::with_capacity(3);
        for candidate in [normalized, without_v1, with_v1] {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        return out;
    }

    vec![
        format!("http://{address}:9080/nbi/v1"),
        format!("https://{address}:9443/nbi/v1"),
        format!("https://{address}/nbi/v1"),
        format!("http://{address}:9080/nbi"),
        format!("https://{address}:9443/nbi"),
        format!("https://{address}/nbi"),
    ]
}
