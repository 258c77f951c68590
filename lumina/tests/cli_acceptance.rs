use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

struct CliTestEnv {
    temp_dir: TempDir,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        Self {
            temp_dir,
            home,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn project(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(assert_cmd::cargo::cargo_bin!("lumina"));
        command
            .args(args)
            .env("HOME", &self.home)
            .env("XDG_CONFIG_HOME", &self.xdg_config)
            .env("XDG_STATE_HOME", &self.xdg_state)
            .env("XDG_RUNTIME_DIR", &self.xdg_runtime)
            .env_remove("RUST_LOG");
        command
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args)
            .output()
            .unwrap_or_else(|e| panic!("failed to execute lumina: {e}"))
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> Output {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn lumina");
        child
            .stdin
            .take()
            .expect("stdin is piped")
            .write_all(input.as_bytes())
            .expect("failed to write stdin");
        child.wait_with_output().expect("failed to wait for lumina")
    }

    fn apply(&self, fixture: &str, extra: &[&str]) -> Output {
        let project = self.project();
        let stream = stream_fixture(fixture);
        let mut args = vec![
            "apply",
            "--project",
            project.to_str().unwrap(),
            "--stream",
            stream.to_str().unwrap(),
        ];
        args.extend_from_slice(extra);
        let output = self.run(&args);
        assert_success(&args, &output);
        output
    }
}

fn stream_fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../lumina-core/tests/fixtures/streams")
        .join(name)
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "lumina {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        stdout,
        stderr
    );
}

fn line_of(path: &Path, needle: &str) -> usize {
    let html = fs::read_to_string(path).expect("bundle should exist");
    let at = html.find(needle).expect("needle should be in bundle");
    html[..at].matches('\n').count() + 1
}

#[test]
fn apply_commits_files_and_writes_bundle() {
    let env = CliTestEnv::new();
    let output = env.apply("todo-app.txt", &["--chunk-size", "13"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("✓ app.js"), "stdout:\n{stdout}");
    assert!(stdout.contains("Committed: 3 written"), "stdout:\n{stdout}");
    assert!(stdout.contains("canvas-confetti@1.9.3"));

    let project = env.project();
    assert!(project.join("index.html").exists());
    assert!(project.join("style.css").exists());
    assert!(project.join(".lumina/dependencies.json").exists());
    assert!(project.join(".lumina/preview.html").exists());
    assert!(project.join(".lumina/preview.map.json").exists());
}

#[test]
fn apply_reports_conflicts_as_json_and_skips_failed_files() {
    let env = CliTestEnv::new();
    env.apply("todo-app.txt", &[]);
    let css_before = fs::read_to_string(env.project().join("style.css")).unwrap();

    let output = env.apply("rename-title.txt", &["--format", "json"]);
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");

    assert_eq!(report["cancelled"], false);
    assert_eq!(report["conflicts"][0]["file"], "style.css");
    assert_eq!(report["conflicts"][0]["reason"], "not-found");
    assert_eq!(report["committed"]["written"][0], "index.html");
    assert_eq!(report["committed"]["skipped"][0], "style.css");

    let index = fs::read_to_string(env.project().join("index.html")).unwrap();
    assert!(index.contains("<h1>My Todos</h1>"));
    assert_eq!(
        fs::read_to_string(env.project().join("style.css")).unwrap(),
        css_before
    );
}

#[test]
fn dry_run_leaves_project_untouched() {
    let env = CliTestEnv::new();
    let out = env.temp_dir.path().join("out/bundle.html");
    let output = env.apply("todo-app.txt", &["--dry-run", "--out", out.to_str().unwrap()]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Dry run"), "stdout:\n{stdout}");
    assert!(!env.project().join("index.html").exists());
    assert!(out.exists());
    assert!(out.with_extension("map.json").exists());
}

#[test]
fn locate_and_resolve_map_bundle_lines_to_sources() {
    let env = CliTestEnv::new();
    env.apply("todo-app.txt", &[]);

    let bundle = env.project().join(".lumina/preview.html");
    let map = env.project().join(".lumina/preview.map.json");
    let line = line_of(&bundle, "list.appendChild(item);").to_string();

    let args = ["locate", "--map", map.to_str().unwrap(), "--line", &line];
    let output = env.run(&args);
    assert_success(&args, &output);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "app.js:8");

    let messages = format!(
        concat!(
            r#"{{"source":"lumina-sandbox","version":1,"type":"CONSOLE_LOG","level":"error","message":"boom","line":{}}}"#,
            "\n",
            r#"{{"source":"someone-else","version":1,"type":"DEP_LOAD_COMPLETE"}}"#,
            "\n",
            r#"{{"source":"lumina-sandbox","version":1,"type":"DEP_LOAD_ERROR","failures":[{{"name":"canvas-confetti","url":"https://cdn.example/x.js"}}]}}"#,
            "\n"
        ),
        line
    );
    let args = ["resolve", "--map", map.to_str().unwrap()];
    let output = env.run_with_stdin(&args, &messages);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.js:8: boom"), "stdout:\n{stdout}");
    assert!(stdout.contains("dependency canvas-confetti failed to load"));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("skipping message on line 2"), "stderr:\n{stderr}");
}

#[test]
fn bundle_rebuilds_committed_project_identically() {
    let env = CliTestEnv::new();
    env.apply("todo-app.txt", &[]);
    let bundle = env.project().join(".lumina/preview.html");
    let first = fs::read_to_string(&bundle).unwrap();

    let project = env.project();
    let args = ["bundle", "--project", project.to_str().unwrap()];
    let output = env.run(&args);
    assert_success(&args, &output);

    assert!(String::from_utf8_lossy(&output.stdout).contains("Fingerprint:"));
    assert_eq!(fs::read_to_string(&bundle).unwrap(), first);
}

#[test]
fn apply_reads_stream_from_stdin() {
    let env = CliTestEnv::new();
    let project = env.project();
    let args = ["apply", "--project", project.to_str().unwrap()];
    let output = env.run_with_stdin(
        &args,
        "<lumina-file name=\"hello.js\">\nconsole.log('hi');\n</lumina-file>\n",
    );
    assert_success(&args, &output);

    assert_eq!(
        fs::read_to_string(project.join("hello.js")).unwrap(),
        "console.log('hi');\n"
    );
}

#[test]
fn apply_rejects_escaping_names_without_stopping_siblings() {
    let env = CliTestEnv::new();
    let project = env.project();
    let args = ["apply", "--project", project.to_str().unwrap()];
    let output = env.run_with_stdin(
        &args,
        concat!(
            "<lumina-file name=\"good.js\">a();</lumina-file>\n",
            "<lumina-file name=\"../evil.js\">b();</lumina-file>\n",
            "<lumina-file name=\"later.js\">c();</lumina-file>\n",
        ),
    );
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("rejected ../evil.js"), "stdout:\n{stdout}");
    assert!(project.join("good.js").exists());
    assert!(project.join("later.js").exists());
    assert!(!env.temp_dir.path().join("evil.js").exists());
    assert!(project.join(".lumina/preview.html").exists());
}
