//! Kubernetes object names.

/// Longest DNS-1123 label kubernetes accepts.
pub const MAX_NAME_LEN: usize = 63;
/// Longest IANA service name, the limit on named ports.
pub const MAX_PORT_NAME_LEN: usize = 15;

pub const DEPLOYMENT_POSTFIX: &str = "-deployment";
pub const SVC_POSTFIX: &str = "-svc";
pub const HPA_POSTFIX: &str = "-hpa";
pub const JOB_POSTFIX: &str = "-job";
pub const INGRESS_POSTFIX: &str = "-ingress";
pub const CONFIG_MAP_POSTFIX: &str = "-config-map";
pub const SECRET_POSTFIX: &str = "-secret";
pub const VOLUME_CLAIM_POSTFIX: &str = "-pvc";

/// Turn an arbitrary identifier into a DNS-1123 label.
///
/// Lowercases, maps every character outside `[a-z0-9-]` to `-`, collapses
/// runs of `-`, strips leading and trailing `-` and truncates to 63
/// characters. Applying it twice gives the same result as applying it once.
/// May return an empty string when the input has no usable characters.
pub fn get_valid_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    out.truncate(MAX_NAME_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Sanitize `raw` and append `postfix`, keeping the result a valid label.
pub fn get_valid_name_with_postfix(raw: &str, postfix: &str) -> String {
    let base = get_valid_name(raw);
    let room = MAX_NAME_LEN.saturating_sub(postfix.len());
    let mut base: String = base.chars().take(room).collect();
    while base.ends_with('-') {
        base.pop();
    }
    format!("{base}{postfix}")
}

/// An IANA_SVC_NAME for a container or service port: sanitized like a
/// label, at most 15 characters and holding at least one letter.
/// `None` when nothing usable remains.
pub fn get_valid_port_name(raw: &str) -> Option<String> {
    let mut name: String = get_valid_name(raw).chars().take(MAX_PORT_NAME_LEN).collect();
    while name.ends_with('-') {
        name.pop();
    }
    name.chars()
        .any(|c| c.is_ascii_lowercase())
        .then_some(name)
}

/// must be non-empty, at most 63 characters, contain only lowercase
/// alphanumerics or '-', and start and end with an alphanumeric
pub fn is_dns1123_label(s: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    !s.is_empty()
        && s.len() <= MAX_NAME_LEN
        && s.chars().all(|c| alnum(c) || c == '-')
        && s.chars().next().map(alnum).unwrap_or(false)
        && s.chars().last().map(alnum).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_case_and_separators() {
        assert_eq!(get_valid_name("HELLO_WORLD.DEMO"), "hello-world-demo");
        assert_eq!(get_valid_name("my$service"), "my-service");
        assert_eq!(get_valid_name("a/b//c"), "a-b-c");
        assert_eq!(get_valid_name("__lead__"), "lead");
        assert_eq!(get_valid_name("$$$"), "");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in [
            "HELLO_WORLD.DEMO",
            "--x--",
            "ÄpfelÜber",
            "a".repeat(80).as_str(),
            "x_".repeat(40).as_str(),
            "",
        ] {
            let once = get_valid_name(raw);
            assert_eq!(get_valid_name(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn sanitized_names_are_labels() {
        for raw in ["HELLO_WORLD.DEMO", "9lives", "x_".repeat(40).as_str()] {
            let name = get_valid_name(raw);
            assert!(is_dns1123_label(&name), "{name}");
        }
    }

    #[test]
    fn postfix_fits_in_label() {
        let name = get_valid_name_with_postfix(&"a".repeat(100), DEPLOYMENT_POSTFIX);
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(name.ends_with(DEPLOYMENT_POSTFIX));
        assert!(is_dns1123_label(&name));
        assert_eq!(get_valid_name_with_postfix("hello", SVC_POSTFIX), "hello-svc");
    }

    #[test]
    fn port_names() {
        assert_eq!(get_valid_port_name("http").as_deref(), Some("http"));
        assert_eq!(
            get_valid_port_name("Grpc_Streaming_Service").as_deref(),
            Some("grpc-streaming")
        );
        assert_eq!(get_valid_port_name("8080"), None);
        assert_eq!(get_valid_port_name("$$"), None);
    }

    #[test]
    fn label_check() {
        assert!(is_dns1123_label("hello-svc"));
        assert!(!is_dns1123_label(""));
        assert!(!is_dns1123_label("-x"));
        assert!(!is_dns1123_label("x-"));
        assert!(!is_dns1123_label("Hello"));
        assert!(!is_dns1123_label(&"a".repeat(64)));
    }
}
