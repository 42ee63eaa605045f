//! Security invariant tests for the x402 payment crates.
//!
//! Source scans over every production crate, run on each
//! `cargo test --workspace` so a regression fails CI.

use regex::Regex;
use std::path::Path;
use walkdir::WalkDir;

/// Read all .rs source files from production crates (excluding tests and this crate).
fn production_source_files() -> Vec<(String, String)> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();

    let crates_dir = root.join("crates");
    let mut files = Vec::new();

    for entry in WalkDir::new(&crates_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }

        let path_str = path.to_str().unwrap_or("");
        if path_str.contains("security-audit") {
            continue;
        }
        if path_str.contains("tests/") || path_str.contains("\\tests\\") {
            continue;
        }

        if let Ok(content) = std::fs::read_to_string(path) {
            files.push((path_str.to_string(), content));
        }
    }

    assert!(!files.is_empty(), "no sources found under {}", crates_dir.display());
    files
}

/// Drop `#[cfg(test)]` modules and doc comments. Heuristic: everything after
/// `#[cfg(test)]` in a file is treated as test code.
fn production_lines(content: &str) -> String {
    let mut result = Vec::new();
    let mut in_test_module = false;

    for line in content.lines() {
        if line.contains("#[cfg(test)]") || line.trim().starts_with("mod tests") {
            in_test_module = true;
        }
        let trimmed = line.trim_start();
        if !in_test_module && !trimmed.starts_with("//!") && !trimmed.starts_with("///") {
            result.push(line);
        }
    }

    result.join("\n")
}

fn files_matching<'a>(
    files: &'a [(String, String)],
    fragment: &'a str,
) -> impl Iterator<Item = &'a (String, String)> {
    files.iter().filter(move |(path, _)| path.contains(fragment))
}

#[test]
fn no_hardcoded_private_keys_in_production_code() {
    let hex_64_re = Regex::new(r"0x[a-fA-F0-9]{64}").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if let Some(mat) = hex_64_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            panic!(
                "Potential hardcoded secret found at {}:{}: {}",
                path,
                line_num,
                mat.as_str()
            );
        }
    }
}

#[test]
fn private_keys_and_secrets_are_never_logged() {
    let log_call_re = Regex::new(r"(?s)tracing::(trace|debug|info|warn|error)!\((.*?)\);").unwrap();
    let secret_field_re = Regex::new(
        r"([%?]\s*|\{)(\w+\.)*(private_key|key|secret|admin_token|metrics_token|signature)\b",
    )
    .unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        for call in log_call_re.captures_iter(&prod_content) {
            let args = &call[2];
            assert!(
                !secret_field_re.is_match(args),
                "Log statement at {} may emit key material or a full signature: {}",
                path,
                args.trim()
            );
        }
    }
}

#[test]
fn http_clients_disable_redirects() {
    let builder_re = Regex::new(r"reqwest::Client::builder\(\)").unwrap();
    let redirect_re = Regex::new(r"redirect\s*\(\s*.*Policy::none\(\)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        for mat in builder_re.find_iter(&prod_content) {
            let search_end = (mat.end() + 500).min(prod_content.len());
            let builder_chain = &prod_content[mat.start()..search_end];

            assert!(
                redirect_re.is_match(builder_chain),
                "reqwest::Client::builder() at {} does not set redirect(Policy::none()). \
                 HTTP clients must not follow redirects.",
                path
            );
        }
    }
}

#[test]
fn constant_time_uses_subtle_crate() {
    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);

        if prod_content.contains("fn constant_time_eq") {
            assert!(
                prod_content.contains("subtle::") || prod_content.contains("use subtle"),
                "File {} contains constant_time_eq that doesn't use the subtle crate.",
                path
            );
        }
    }
}

#[test]
fn bearer_tokens_compared_in_constant_time() {
    let naive_re = Regex::new(r"(admin_token|metrics_token)[^;\n]*(==|!=)").unwrap();

    for (path, content) in &production_source_files() {
        let prod_content = production_lines(content);
        if let Some(mat) = naive_re.find(&prod_content) {
            panic!(
                "Token at {} compared with == instead of bearer_matches: {}",
                path,
                mat.as_str()
            );
        }
    }

    let files = production_source_files();
    let routes: Vec<_> = files_matching(&files, "x402-pay-server")
        .filter(|(_, c)| c.contains("admin_token") || c.contains("metrics_token"))
        .filter(|(p, _)| p.contains("routes"))
        .collect();
    assert!(!routes.is_empty(), "no route file reads the admin or metrics token");
    for (path, content) in routes {
        assert!(
            content.contains("bearer_matches"),
            "{} reads a token but never calls bearer_matches",
            path
        );
    }
}

#[test]
fn server_config_debug_redacts_tokens() {
    let files = production_source_files();
    let (path, content) = files_matching(&files, "x402-pay-server")
        .find(|(p, _)| p.ends_with("config.rs"))
        .expect("server config.rs");
    let prod_content = production_lines(content);

    let derive_debug_re = Regex::new(r"#\[derive\([^)]*Debug[^)]*\)\]\s*pub struct ServerConfig").unwrap();
    assert!(
        !derive_debug_re.is_match(&prod_content),
        "ServerConfig at {} derives Debug, which would print ADMIN_TOKEN and METRICS_TOKEN",
        path
    );
    assert!(prod_content.contains("<redacted>"), "ServerConfig Debug at {} must redact tokens", path);
}

#[test]
fn request_paths_do_not_unwrap() {
    let unwrap_re = Regex::new(r"\.unwrap\(\)|\.expect\(").unwrap();
    let files = production_source_files();

    let request_path_files = files.iter().filter(|(path, _)| {
        (path.contains("x402-pay-server") && !path.ends_with("metrics.rs"))
            || path.contains("x402-pay-ledger")
            || path.ends_with("verifier.rs")
            || path.ends_with("replay_store.rs")
    });

    for (path, content) in request_path_files {
        let prod_content = production_lines(content);
        if let Some(mat) = unwrap_re.find(&prod_content) {
            let line_num = prod_content[..mat.start()].lines().count() + 1;
            panic!(
                "{} at {}:{} can panic on a request path; propagate the error instead",
                mat.as_str(),
                path,
                line_num
            );
        }
    }
}

#[test]
fn error_responses_do_not_leak_internals() {
    let dangerous_patterns = ["transport error:", "sqlite", "rusqlite", "stack trace", "RUST_BACKTRACE"];

    for (path, content) in &production_source_files() {
        if !content.contains("HttpResponse::") {
            continue;
        }

        let prod_content = production_lines(content);
        for (i, line) in prod_content.lines().enumerate() {
            let lower = line.to_lowercase();
            for pattern in &dangerous_patterns {
                if lower.contains(&pattern.to_lowercase()) && line.contains("json") {
                    panic!(
                        "Potentially sensitive error detail '{}' found in HTTP response at {}:{}. \
                         Internal details should be logged server-side only.",
                        pattern,
                        path,
                        i + 1
                    );
                }
            }
        }
    }
}

#[test]
fn server_supports_persistent_replay_store() {
    let files = production_source_files();
    let (path, content) = files_matching(&files, "x402-pay-server")
        .find(|(p, _)| p.ends_with("main.rs"))
        .expect("server main.rs");
    let prod_content = production_lines(content);

    assert!(
        prod_content.contains("SqliteReplayStore"),
        "Server at {} only uses an in-memory replay store; replay protection would reset on restart.",
        path
    );
}

#[test]
fn ledger_writes_take_immediate_transactions() {
    let files = production_source_files();
    let (path, content) = files_matching(&files, "x402-pay-ledger")
        .find(|(p, _)| p.ends_with("sqlite.rs"))
        .expect("ledger sqlite.rs");
    let prod_content = production_lines(content);

    assert!(
        !prod_content.contains(".transaction()"),
        "Ledger store at {} opens a deferred transaction; budget check-then-increment needs \
         TransactionBehavior::Immediate.",
        path
    );
    assert!(prod_content.contains("TransactionBehavior::Immediate"));
}
