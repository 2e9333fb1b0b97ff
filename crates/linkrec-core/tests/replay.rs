use linkrec_core::{DeliveryState, ResendFlags, SettleMode, TransferDirective, reconcile_with_mode};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    local: Option<String>,
    remote: Option<String>,
    #[serde(default)]
    settle_mode: SettleMode,
    expected: Expected,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
enum Expected {
    Skip,
    SkipAndForget,
    Resend {
        resume: bool,
        #[serde(default)]
        aborted: bool,
        #[serde(default)]
        settled: bool,
        #[serde(default)]
        state: Option<String>,
    },
}

fn fixtures_dir() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../fixtures/reconcile")
}

fn parse_state(s: &Option<String>) -> Option<DeliveryState> {
    s.as_deref()
        .map(|s| s.parse().unwrap_or_else(|e| panic!("bad state {s:?}: {e}")))
}

fn load_cases() -> Vec<Case> {
    let mut cases = Vec::new();
    for entry in fs::read_dir(fixtures_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = fs::read_to_string(&path).unwrap_or_else(|e| {
            panic!("failed to read fixture {:?}: {}", path, e);
        });
        let mut file_cases: Vec<Case> = serde_json::from_str(&content).unwrap_or_else(|e| {
            panic!("failed to parse fixture {:?}: {}", path, e);
        });
        cases.append(&mut file_cases);
    }
    cases
}

fn expected_directive(expected: &Expected) -> TransferDirective {
    match expected {
        Expected::Skip => TransferDirective::Skip,
        Expected::SkipAndForget => TransferDirective::SkipAndForget,
        Expected::Resend {
            resume,
            aborted,
            settled,
            state,
        } => TransferDirective::Resend(ResendFlags {
            resume: *resume,
            aborted: *aborted,
            settled: *settled,
            state: parse_state(state),
        }),
    }
}

#[test]
fn replay_reconcile_fixtures() {
    let cases = load_cases();
    assert!(cases.len() >= 25, "expected the full table, got {}", cases.len());

    let mut failures = Vec::new();
    for case in &cases {
        let got = reconcile_with_mode(
            case.settle_mode,
            parse_state(&case.local),
            parse_state(&case.remote),
        );
        let want = expected_directive(&case.expected);
        if got != want {
            failures.push(format!("{}: got {got:?}, want {want:?}", case.name));
        }
    }

    assert!(
        failures.is_empty(),
        "{} of {} cases failed:\n{}",
        failures.len(),
        cases.len(),
        failures.join("\n")
    );
}

#[test]
fn replay_is_deterministic() {
    for case in load_cases() {
        let local = parse_state(&case.local);
        let remote = parse_state(&case.remote);
        assert_eq!(
            reconcile_with_mode(case.settle_mode, local, remote),
            reconcile_with_mode(case.settle_mode, local, remote),
            "{}",
            case.name
        );
    }
}
