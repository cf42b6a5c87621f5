/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// A variable that is unset and has no fallback is left in place so the
/// parse error (or the literal value) points at it.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: copy the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };
        let expr = &after[..end];
        out.push_str(&expand(expr));
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn expand(expr: &str) -> String {
    let (name, fallback) = match expr.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (expr, None),
    };
    if name.is_empty() {
        return format!("${{{expr}}}");
    }
    match (std::env::var(name), fallback) {
        (Ok(value), _) => value,
        (Err(_), Some(fallback)) => fallback.to_string(),
        (Err(_), None) => format!("${{{expr}}}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unsafe_code)] // edition 2024: env::set_var/remove_var are unsafe
    fn substitutes_known_var() {
        unsafe { std::env::set_var("MURMUR_TEST_VAR", "hello") };
        assert_eq!(substitute_env("key=${MURMUR_TEST_VAR}!"), "key=hello!");
        unsafe { std::env::remove_var("MURMUR_TEST_VAR") };
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${MURMUR_NONEXISTENT_XYZ}"),
            "${MURMUR_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn uses_fallback_for_unset_var() {
        assert_eq!(
            substitute_env("port = ${MURMUR_UNSET_PORT_XYZ:-8000}"),
            "port = 8000"
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_env("secret = \"${OPEN"), "secret = \"${OPEN");
    }

    #[test]
    fn empty_name_is_literal() {
        assert_eq!(substitute_env("a${}b"), "a${}b");
    }
}
