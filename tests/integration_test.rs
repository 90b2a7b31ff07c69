/// End-to-end integration tests for the codemend pipeline.
///
/// Tests the complete flow:
///   Workspace → Indexer → Relevance → Generation → Stitch → Workspace
use codemend::codec::{self, FileBlockCodec};
use codemend::config::Config;
use codemend::generation::RetryPolicy;
use codemend::generation::mock::ScriptedGenerator;
use codemend::indexer::core::Indexer;
use codemend::indexer::relevance::RelevanceSearch;
use codemend::repair::RepairPipeline;
use codemend::stitch::StitchMethod;
use codemend::workspace;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const CART: &str = "class Cart:
    def __init__(self):
        self.items = []

    def checkout(self):
        return sum(i.price for i in self.items)
";

/// Full pipeline: project on disk → plan → two-phase generation → stitch → write
#[test]
fn test_full_pipeline() {
    // 1. Setup temp project
    let temp_dir = tempdir().unwrap();
    let project = temp_dir.path();
    fs::create_dir_all(project.join("shop")).unwrap();
    fs::write(project.join("shop/cart.py"), CART).unwrap();
    fs::write(
        project.join("users.py"),
        "def login(user):\n    return True\n",
    )
    .unwrap();
    fs::write(project.join("broken.py"), "def oops(:\n    pass\n").unwrap();
    fs::write(project.join("README.md"), "# Shop\n").unwrap();

    let config = Config::default();
    let files = workspace::read_project_files(project, &config).unwrap();
    assert_eq!(files.len(), 4);

    // 2. Phase 1 is cut off mid-line, phase 2 repeats the tail and finishes.
    let generator = ScriptedGenerator::replies([
        "class Cart:\n    def __init__(self):\n        self.items = []\n\n    def checkout(self):\n        total = sum(i.price for i in self.items)\n        return round(total",
        "return round(total * 0.9, 2)\n<!-- END OF FILE, DO NOT CONTINUE -->",
    ]);
    let pipeline = RepairPipeline::new(&generator, &config)
        .with_policy(RetryPolicy::new(5, Duration::ZERO));
    let report = pipeline
        .run("apply a 10% discount at checkout", &files)
        .unwrap();

    // 3. Only the cart was selected; the broken file was skipped, not fatal
    assert_eq!(report.plan.selection.paths, vec!["shop/cart.py".to_string()]);
    assert_eq!(report.plan.parse_failures.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(report.repaired.len(), 1);

    let repair = &report.repaired[0];
    assert_eq!(repair.stitch.method, StitchMethod::Overlap);
    assert!(repair.stitch.syntax_valid);
    assert!(!repair.completed_in_phase_one);
    assert!(repair.text.ends_with("        return round(total * 0.9, 2)\n"));
    assert!(!repair.text.contains("END OF FILE"));

    // 4. Write back with a backup of the original
    let written = workspace::write_files(project, &report.files_to_write()).unwrap();
    assert_eq!(written.written, vec!["shop/cart.py".to_string()]);
    let backup = &written.backups["shop/cart.py"];
    assert_eq!(fs::read_to_string(project.join(backup)).unwrap(), CART);
    assert_eq!(
        fs::read_to_string(project.join("shop/cart.py")).unwrap(),
        repair.text
    );

    // 5. The backup is not picked up by the next scan
    let rescanned = workspace::read_project_files(project, &config).unwrap();
    assert_eq!(rescanned.len(), 4);
}

/// Exhausted retries on one file leave the others untouched
#[test]
fn test_generation_failure_is_isolated() {
    let temp_dir = tempdir().unwrap();
    let project = temp_dir.path();
    fs::write(project.join("cart.py"), CART).unwrap();

    let config = Config::default();
    let files = workspace::read_project_files(project, &config).unwrap();

    let generator = ScriptedGenerator::replies(["", "", "", ""]);
    let report = RepairPipeline::new(&generator, &config)
        .with_policy(RetryPolicy::new(3, Duration::ZERO))
        .run("checkout", &files)
        .unwrap();

    assert_eq!(generator.calls(), 3);
    assert!(report.repaired.is_empty());
    assert_eq!(report.failed.len(), 1);
    let message = report.failed[0].to_string();
    assert!(message.contains("cart.py"), "{message}");
    assert!(message.contains("3 attempt(s)"), "{message}");
    assert_eq!(fs::read_to_string(project.join("cart.py")).unwrap(), CART);
}

/// Context payload for the generator decodes back to the selected snippets
#[test]
fn test_context_payload_decodes() {
    let temp_dir = tempdir().unwrap();
    let project = temp_dir.path();
    fs::write(project.join("cart.py"), CART).unwrap();
    fs::write(project.join("users.py"), "def login(user):\n    return True\n").unwrap();

    let config = Config::default();
    let mut indexer = Indexer::new().unwrap();
    let (index, scan) = indexer.index_directory(project, &config).unwrap();
    assert_eq!(scan.indexed, 2);
    assert!(index.lookup_in_file("cart.py", "Cart.checkout").is_some());

    let files = workspace::read_project_files(project, &config).unwrap();
    let payload = RelevanceSearch::default().context_payload(
        "checkout",
        &index,
        &files,
        &config.files.fallback_extensions,
        2,
    );

    let blocks = FileBlockCodec::default().decode(&payload).unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks["cart.py"].content.contains("def checkout(self):"));
}

/// Generator output with an unsafe path writes only the safe blocks
#[test]
fn test_decoded_response_is_written_safely() {
    let temp_dir = tempdir().unwrap();
    let project = temp_dir.path().join("project");
    fs::create_dir_all(&project).unwrap();

    let response = "Sure, here you go:\n\
        ---FILE: app.py\nprint('hi')\n---END_FILE---\n\
        ---FILE: ../evil.py\nimport os\n---END_FILE---\n\
        ---FILE: static/app.js\nconsole.log(1);\n---TRUNCATED---\n";

    let report = FileBlockCodec::permissive().decode_partial(response);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.blocks["static/app.js"].truncated);

    let files: BTreeMap<String, String> = report
        .blocks
        .into_iter()
        .map(|(path, block)| (path, block.content))
        .collect();
    let written = workspace::write_files(&project, &files).unwrap();

    assert_eq!(written.written.len(), 2);
    assert!(!temp_dir.path().join("evil.py").exists());
    assert_eq!(
        fs::read_to_string(project.join("static/app.js")).unwrap(),
        "console.log(1);"
    );

    // Re-encoding what was written reproduces the files
    let again = workspace::read_project_files(&project, &Config::default()).unwrap();
    let decoded = FileBlockCodec::default().decode(&codec::encode(&again)).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded["app.py"].content, "print('hi')");
}
