//! Unit tests for resource URI template matching.

use mcp_capability_server::registry::UriTemplate;
use mcp_capability_server::AppError;

#[test]
fn literal_pattern_matches_only_itself() {
    let template = UriTemplate::parse("server://info").expect("parse");

    assert!(!template.is_template());
    assert_eq!(template.matches("server://info").map(|v| v.len()), Some(0));
    assert!(template.matches("server://info/extra").is_none());
    assert!(template.matches("xserver://info").is_none());
}

#[test]
fn simple_variable_binds_one_segment() {
    let template = UriTemplate::parse("server://tools/{name}").expect("parse");
    assert_eq!(template.variables(), ["name".to_owned()]);

    let vars = template.matches("server://tools/echo").expect("match");
    assert_eq!(vars.get("name").map(String::as_str), Some("echo"));

    assert!(template.matches("server://tools/a/b").is_none(), "no slash in a segment");
    assert!(template.matches("server://tools/").is_none(), "segment must be non-empty");
}

#[test]
fn reserved_variable_spans_slashes() {
    let template = UriTemplate::parse("file:///{+path}").expect("parse");

    let vars = template.matches("file:///home/user/notes.txt").expect("match");
    assert_eq!(vars.get("path").map(String::as_str), Some("home/user/notes.txt"));
}

#[test]
fn multiple_variables_are_all_bound() {
    let template = UriTemplate::parse("db://{schema}/tables/{table}").expect("parse");

    let vars = template.matches("db://public/tables/users").expect("match");
    assert_eq!(vars.get("schema").map(String::as_str), Some("public"));
    assert_eq!(vars.get("table").map(String::as_str), Some("users"));
}

#[test]
fn malformed_templates_are_rejected() {
    for raw in [
        "a://{name",
        "a://name}",
        "a://{}",
        "a://{bad-name}",
        "a://{x}/{x}",
    ] {
        let err = UriTemplate::parse(raw).expect_err(raw);
        assert!(matches!(err, AppError::Registry(_)), "{raw}: {err}");
    }
}

#[test]
fn display_shows_raw_pattern() {
    let template = UriTemplate::parse("server://tools/{name}").expect("parse");
    assert_eq!(template.to_string(), "server://tools/{name}");
    assert_eq!(template.as_str(), "server://tools/{name}");
}
