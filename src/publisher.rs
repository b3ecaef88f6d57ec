//! Contract publisher: after a phase reaches `done`, enumerate its changed
//! files and extract exported top-level declarations as contracts (spec
//! 4.7).
//!
//! Extraction is syntactic, not type-checked — signatures come straight from
//! source text via regular expressions over each changed file, grounded on
//! the teacher's git-diff-driven change enumeration (`tracker::GitTracker`).
//! Unrecognized extensions still yield a `File`-kind contract so every
//! changed path is represented.

use crate::fabric::{Contract, ContractKind, ContractStatus, FabricStore};
use crate::tracker::GitTracker;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static RUST_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*pub\s+(?:async\s+)?fn\s+(\w+)").unwrap());
static RUST_STRUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*pub\s+struct\s+(\w+)").unwrap());
static RUST_ENUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*pub\s+enum\s+(\w+)").unwrap());
static RUST_TRAIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*pub\s+trait\s+(\w+)").unwrap());
static RUST_IMPL_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?fn\s+(\w+)\s*\(").unwrap()
});
static RUST_IMPL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"impl(?:<[^>]*>)?\s+(?:\w+\s+for\s+)?(\w+)").unwrap());

/// Extracts `(kind, name, signature line)` triples from Rust source text.
pub fn extract_rust_symbols(source: &str) -> Vec<(ContractKind, String, String)> {
    let mut out = Vec::new();
    for line in source.lines() {
        if let Some(c) = RUST_FN.captures(line) {
            out.push((ContractKind::Function, c[1].to_string(), line.trim().to_string()));
        } else if let Some(c) = RUST_STRUCT.captures(line) {
            out.push((ContractKind::Type, c[1].to_string(), line.trim().to_string()));
        } else if let Some(c) = RUST_ENUM.captures(line) {
            out.push((ContractKind::Type, c[1].to_string(), line.trim().to_string()));
        } else if let Some(c) = RUST_TRAIT.captures(line) {
            out.push((ContractKind::Interface, c[1].to_string(), line.trim().to_string()));
        }
    }

    // Methods inside `impl ... { }` blocks: track the current impl target by
    // brace depth, recording every `pub fn` found while inside one.
    let mut impl_target: Option<String> = None;
    let mut depth_at_impl: i32 = -1;
    let mut depth = 0i32;
    for line in source.lines() {
        if let Some(c) = RUST_IMPL_BLOCK.captures(line) {
            impl_target = Some(c[1].to_string());
            depth_at_impl = depth;
        }
        if impl_target.is_some()
            && depth > depth_at_impl
            && let Some(c) = RUST_IMPL_METHOD.captures(line)
            && line.contains("pub ")
        {
            let target = impl_target.clone().unwrap();
            out.push((
                ContractKind::Method,
                format!("{target}::{}", &c[1]),
                line.trim().to_string(),
            ));
        }
        depth += line.matches('{').count() as i32 - line.matches('}').count() as i32;
        if impl_target.is_some() && depth <= depth_at_impl {
            impl_target = None;
        }
    }

    out
}

fn is_rust_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("rs")
}

/// Publishes contracts for every file changed between `base_sha` and
/// `final_sha`, then claims each touched file for `phase_id` (warn-and-
/// continue on conflict — the claim represents most-recent owner).
pub fn publish_for_phase(
    phase_id: &str,
    base_sha: &str,
    final_sha: &str,
    working_dir: &Path,
    git: &GitTracker,
    fabric: &FabricStore,
) -> anyhow::Result<usize> {
    let changes = git.diff_commit_range(base_sha, final_sha)?;
    let mut contracts = Vec::new();

    for path in changes.all_paths() {
        let path_str = path.to_string_lossy().to_string();
        if is_rust_file(&path) {
            let full_path = working_dir.join(&path);
            if let Ok(source) = std::fs::read_to_string(&full_path) {
                for (kind, name, signature) in extract_rust_symbols(&source) {
                    contracts.push(Contract {
                        producer: phase_id.to_string(),
                        kind,
                        name,
                        signature,
                        package: path_str.clone(),
                        status: ContractStatus::Fulfilled,
                    });
                }
            }
        }
        contracts.push(Contract {
            producer: phase_id.to_string(),
            kind: ContractKind::File,
            name: path_str.clone(),
            signature: path_str.clone(),
            package: path_str.clone(),
            status: ContractStatus::Fulfilled,
        });

        if let Err(e) = fabric.claim_file(&path_str, phase_id) {
            tracing::warn!(phase_id, path = %path_str, error = %e, "file claim conflict");
        }
    }

    fabric.publish_contracts(&contracts)?;
    Ok(contracts.len())
}
