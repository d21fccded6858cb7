//! Source hygiene checks
//!
//! The transport and session promise that nothing panics past their boundary
//! and that errors are logged or returned, not swallowed. These checks hold
//! `src/` to that with per-pattern budgets. A budget only ever goes down.

use std::fs;
use std::path::{Path, PathBuf};

struct Budget {
    pattern: &'static str,
    max: usize,
}

/// Calls that can panic inside the library or the client.
const PANICS: &[Budget] = &[
    Budget { pattern: ".unwrap()", max: 0 },
    Budget { pattern: ".expect(", max: 0 },
    Budget { pattern: "panic!(", max: 0 },
    Budget { pattern: "unreachable!(", max: 0 },
    Budget { pattern: "todo!(", max: 0 },
    Budget { pattern: "unimplemented!(", max: 0 },
];

/// Errors dropped without a look. The one `.ok()` is `std::env::var` in
/// config, where an unset variable means "use the default".
const DISCARDS: &[Budget] = &[
    Budget { pattern: "let _ =", max: 0 },
    Budget { pattern: ".ok()", max: 1 },
    Budget { pattern: "#[allow(dead_code)]", max: 0 },
];

/// Library output goes through `tracing`; only the binary prints.
const PRINTS: &[Budget] = &[
    Budget { pattern: "println!(", max: 0 },
    Budget { pattern: "print!(", max: 0 },
    Budget { pattern: "dbg!(", max: 0 },
];

/// Blocking the runtime thread stalls every socket task.
const BLOCKING: &[Budget] = &[Budget { pattern: "std::thread::sleep", max: 0 }];

/// Production sources under `src/`, without tests and test helpers.
fn production_sources() -> Vec<(PathBuf, String)> {
    let Ok(entries) = fs::read_dir(Path::new("src")) else {
        return Vec::new();
    };
    let mut out: Vec<(PathBuf, String)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|e| e == "rs"))
        .filter(|path| {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            !name.ends_with("_test.rs") && name != "test_helpers.rs"
        })
        .filter_map(|path| fs::read_to_string(&path).ok().map(|content| (path, content)))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn library_sources() -> Vec<(PathBuf, String)> {
    production_sources()
        .into_iter()
        .filter(|(path, _)| !path.ends_with("main.rs"))
        .collect()
}

/// Check every budget against `files`, returning one line per violation.
fn violations(files: &[(PathBuf, String)], budgets: &[Budget]) -> Vec<String> {
    let mut found = Vec::new();
    for budget in budgets {
        let hits: Vec<String> = files
            .iter()
            .flat_map(|(path, content)| {
                content
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| line.contains(budget.pattern))
                    .map(move |(n, _)| format!("{}:{}", path.display(), n + 1))
            })
            .collect();
        if hits.len() > budget.max {
            found.push(format!(
                "`{}`: found {}, max {} at {}",
                budget.pattern,
                hits.len(),
                budget.max,
                hits.join(", ")
            ));
        }
    }
    found
}

#[test]
fn sources_are_present() {
    let names: Vec<String> = production_sources()
        .iter()
        .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    for expected in ["lib.rs", "main.rs", "socket.rs", "session.rs"] {
        assert!(names.iter().any(|n| n == expected), "missing src/{expected}; scanned {names:?}");
    }
}

#[test]
fn no_panicking_calls() {
    let found = violations(&production_sources(), PANICS);
    assert!(found.is_empty(), "{}", found.join("\n"));
}

#[test]
fn errors_are_not_discarded() {
    let found = violations(&production_sources(), DISCARDS);
    assert!(found.is_empty(), "{}", found.join("\n"));
}

#[test]
fn library_does_not_print() {
    let found = violations(&library_sources(), PRINTS);
    assert!(found.is_empty(), "{}", found.join("\n"));
}

#[test]
fn no_blocking_sleeps() {
    let found = violations(&production_sources(), BLOCKING);
    assert!(found.is_empty(), "{}", found.join("\n"));
}

#[test]
fn only_the_socket_spawns_tasks() {
    let spawners: Vec<String> = library_sources()
        .iter()
        .filter(|(_, content)| content.contains("tokio::spawn"))
        .map(|(path, _)| path.display().to_string())
        .collect();
    assert!(
        spawners.iter().all(|p| p.ends_with("socket.rs")),
        "tasks spawned outside the socket: {spawners:?}"
    );
}
