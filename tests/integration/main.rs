//! Integration tests for recap
//!
//! Every test that touches the cache points --store at its own
//! temporary directory, so tests are independent of each other and of
//! any store the developer has at the default location.

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn recap() -> Command {
        let mut cmd = cargo_bin_cmd!("recap");
        cmd.env_remove("RECAP_MODE").env_remove("RECAP_CONFIG");
        cmd
    }

    #[test]
    fn help_displays() {
        recap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Transparent Execution Cache"));
    }

    #[test]
    fn version_displays() {
        recap()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("recap"));
    }

    #[test]
    fn run_requires_a_command() {
        recap().arg("run").assert().failure();
    }

    #[test]
    fn config_path() {
        recap()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        recap()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[run]"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        recap()
            .args(["--config", path.to_str().unwrap(), "config", "init"])
            .assert()
            .success();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[run]"));
    }
}

mod run_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn recap() -> Command {
        let mut cmd = cargo_bin_cmd!("recap");
        cmd.env_remove("RECAP_MODE").env_remove("RECAP_CONFIG");
        cmd
    }

    /// `recap run -v --store <store> -C <dir> -- <argv...>`
    fn run_in(store: &Path, dir: &Path, argv: &[&str]) -> Command {
        let mut cmd = recap();
        cmd.arg("run")
            .arg("-v")
            .arg("--store")
            .arg(store)
            .arg("-C")
            .arg(dir)
            .arg("--");
        cmd.args(argv);
        cmd
    }

    #[test]
    fn record_then_replay_round_trip() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "echo hello"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("hello\n"))
            .stderr(predicate::str::contains("record succeeded"));

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("hello\n"))
            .stderr(predicate::str::contains("replay succeeded"));
    }

    #[test]
    fn replay_preserves_nonzero_exit_codes() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "echo broken; exit 7"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .code(7)
            .stderr(predicate::str::contains("record succeeded"));

        run_in(store.path(), work.path(), &argv)
            .assert()
            .code(7)
            .stdout(predicate::eq("broken\n"))
            .stderr(predicate::str::contains("replay succeeded"));
    }

    #[test]
    fn input_change_forces_a_fresh_run() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("input.txt"), "one\n").unwrap();
        let argv = ["sh", "-c", "cat input.txt"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("one\n"));

        std::fs::write(work.path().join("input.txt"), "two\n").unwrap();

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("two\n"))
            .stderr(predicate::str::contains("replay failed"));

        // Both contents are now recorded; flipping back replays again.
        std::fs::write(work.path().join("input.txt"), "one\n").unwrap();

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("one\n"))
            .stderr(predicate::str::contains("replay succeeded"));
    }

    #[test]
    fn outputs_are_restored_after_deletion() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("in.txt"), "data\n").unwrap();
        let argv = ["sh", "-c", "cat in.txt > out.txt"];

        run_in(store.path(), work.path(), &argv).assert().success();
        assert_eq!(
            std::fs::read_to_string(work.path().join("out.txt")).unwrap(),
            "data\n"
        );

        std::fs::remove_file(work.path().join("out.txt")).unwrap();

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stderr(predicate::str::contains("replay succeeded"));
        assert_eq!(
            std::fs::read_to_string(work.path().join("out.txt")).unwrap(),
            "data\n"
        );
    }

    #[test]
    fn child_process_reads_are_inputs() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("a"), "A\n").unwrap();
        std::fs::write(work.path().join("b"), "B\n").unwrap();
        // cat runs as a child of the shell; its reads must count.
        let argv = ["sh", "-c", "cat a; cat b"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("A\nB\n"));

        std::fs::write(work.path().join("b"), "B2\n").unwrap();

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("A\nB2\n"))
            .stderr(predicate::str::contains("replay failed"));
    }

    #[test]
    fn files_written_by_child_processes_are_replayed() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        // The subshell forks; the write happens in the child.
        let argv = ["sh", "-c", "( echo from-child > child_out ); echo parent-done"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("parent-done\n"))
            .stderr(predicate::str::contains("record succeeded"));
        assert_eq!(
            std::fs::read_to_string(work.path().join("child_out")).unwrap(),
            "from-child\n"
        );

        std::fs::remove_file(work.path().join("child_out")).unwrap();

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stdout(predicate::eq("parent-done\n"))
            .stderr(predicate::str::contains("replay succeeded"));
        assert_eq!(
            std::fs::read_to_string(work.path().join("child_out")).unwrap(),
            "from-child\n"
        );
    }

    #[test]
    fn stream_interleaving_is_preserved() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "echo out; echo err 1>&2; echo more"];

        // No -v here: stderr must carry exactly what the command wrote.
        let mut first = recap();
        first
            .arg("run")
            .args(["--store", store.path().to_str().unwrap()])
            .args(["-C", work.path().to_str().unwrap()])
            .arg("--")
            .args(argv)
            .assert()
            .success()
            .stdout(predicate::eq("out\nmore\n"))
            .stderr(predicate::eq("err\n"));

        let mut second = recap();
        second
            .arg("run")
            .args(["--store", store.path().to_str().unwrap()])
            .args(["-C", work.path().to_str().unwrap()])
            .arg("--")
            .args(argv)
            .assert()
            .success()
            .stdout(predicate::eq("out\nmore\n"))
            .stderr(predicate::eq("err\n"));
    }

    #[test]
    fn missing_executable_fails_the_same_way_twice() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["./no-such-program"];

        for _ in 0..2 {
            run_in(store.path(), work.path(), &argv)
                .assert()
                .code(127)
                .stderr(
                    predicate::str::contains("Failed to launch")
                        .and(predicate::str::contains("No such file")),
                );
        }
    }

    #[test]
    fn signal_deaths_are_not_recorded() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "kill -9 $$"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .code(137)
            .stderr(predicate::str::contains("record failed"));

        // Still no recording, so the second run dies for real too.
        run_in(store.path(), work.path(), &argv).assert().code(137);
    }

    #[test]
    fn destructive_commands_run_uncached() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("a"), "payload").unwrap();
        let argv = ["mv", "a", "b"];

        run_in(store.path(), work.path(), &argv)
            .assert()
            .success()
            .stderr(predicate::str::contains("bailed out"));

        // The command still did its work, and nothing was cached.
        assert!(!work.path().join("a").exists());
        assert_eq!(
            std::fs::read_to_string(work.path().join("b")).unwrap(),
            "payload"
        );
        assert!(!store.path().join("index").exists());
    }

    #[test]
    fn disabled_mode_leaves_the_store_alone() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();

        let mut cmd = recap();
        cmd.arg("run")
            .args(["--mode", "disabled"])
            .args(["--store", store.path().to_str().unwrap()])
            .args(["-C", work.path().to_str().unwrap()])
            .args(["--", "sh", "-c", "echo plain"])
            .assert()
            .success()
            .stdout(predicate::eq("plain\n"));

        assert!(!store.path().join("index").exists());
        assert!(!store.path().join("objects").exists());
    }

    #[test]
    fn read_only_mode_never_records() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();

        let mut cmd = recap();
        cmd.arg("run")
            .args(["--mode", "read-only"])
            .args(["--store", store.path().to_str().unwrap()])
            .args(["-C", work.path().to_str().unwrap()])
            .args(["--", "sh", "-c", "echo ro"])
            .assert()
            .success()
            .stdout(predicate::eq("ro\n"));

        assert!(!store.path().join("index").exists());
    }

    #[test]
    fn write_only_mode_never_replays() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "echo wo"];

        for _ in 0..2 {
            let mut cmd = recap();
            cmd.arg("run")
                .arg("-v")
                .args(["--mode", "write-only"])
                .args(["--store", store.path().to_str().unwrap()])
                .args(["-C", work.path().to_str().unwrap()])
                .arg("--")
                .args(argv)
                .assert()
                .success()
                .stdout(predicate::eq("wo\n"))
                .stderr(predicate::str::contains("replay attempted").not());
        }
    }

    #[test]
    fn tracked_env_is_part_of_the_identity() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let argv = ["sh", "-c", "echo env"];

        run_in(store.path(), work.path(), &argv)
            .env("LANG", "C.UTF-8")
            .assert()
            .success()
            .stderr(predicate::str::contains("record succeeded"));

        // A different tracked variable means a different invocation.
        run_in(store.path(), work.path(), &argv)
            .env("LANG", "en_US.UTF-8")
            .assert()
            .success()
            .stderr(predicate::str::contains("record succeeded"));

        run_in(store.path(), work.path(), &argv)
            .env("LANG", "C.UTF-8")
            .assert()
            .success()
            .stderr(predicate::str::contains("replay succeeded"));
    }
}

mod cache_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn recap() -> Command {
        let mut cmd = cargo_bin_cmd!("recap");
        cmd.env_remove("RECAP_MODE").env_remove("RECAP_CONFIG");
        cmd
    }

    fn record_one(store: &Path, work: &Path) {
        recap()
            .arg("run")
            .args(["--store", store.to_str().unwrap()])
            .args(["-C", work.to_str().unwrap()])
            .args(["--", "sh", "-c", "echo cached"])
            .assert()
            .success();
    }

    #[test]
    fn stats_reports_an_empty_store() {
        let store = TempDir::new().unwrap();

        recap()
            .args(["cache", "--store", store.path().to_str().unwrap(), "stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Recordings: 0"));
    }

    #[test]
    fn stats_counts_recordings() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        record_one(store.path(), work.path());

        recap()
            .args(["cache", "--store", store.path().to_str().unwrap(), "stats"])
            .assert()
            .success()
            .stdout(
                predicate::str::contains("Commands:   1")
                    .and(predicate::str::contains("Recordings: 1")),
            );
    }

    #[test]
    fn ls_lists_the_recorded_command() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        record_one(store.path(), work.path());

        recap()
            .args(["cache", "--store", store.path().to_str().unwrap(), "ls"])
            .assert()
            .success()
            .stdout(predicate::str::contains("echo cached"));

        recap()
            .args([
                "cache",
                "--store",
                store.path().to_str().unwrap(),
                "ls",
                "--format",
                "plain",
            ])
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{64}\n$").unwrap());
    }

    #[test]
    fn ls_handles_an_empty_store() {
        let store = TempDir::new().unwrap();

        recap()
            .args(["cache", "--store", store.path().to_str().unwrap(), "ls"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached invocations."));
    }

    #[test]
    fn clear_removes_everything() {
        let store = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        record_one(store.path(), work.path());

        recap()
            .args([
                "cache",
                "--store",
                store.path().to_str().unwrap(),
                "clear",
                "--yes",
            ])
            .assert()
            .success();

        assert!(!store.path().join("index").exists());

        recap()
            .args(["cache", "--store", store.path().to_str().unwrap(), "stats"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Recordings: 0"));
    }
}

mod trace_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn recap() -> Command {
        let mut cmd = cargo_bin_cmd!("recap");
        cmd.env_remove("RECAP_MODE").env_remove("RECAP_CONFIG");
        cmd
    }

    #[test]
    fn trace_prints_events_on_stderr() {
        let work = TempDir::new().unwrap();

        recap()
            .arg("trace")
            .args(["-C", work.path().to_str().unwrap()])
            .args(["--", "sh", "-c", "echo hi"])
            .assert()
            .success()
            .stdout(predicate::eq("hi\n"))
            .stderr(
                predicate::str::contains("exec")
                    .and(predicate::str::contains("stdout"))
                    .and(predicate::str::contains("exit 0")),
            );
    }

    #[test]
    fn trace_passes_exit_codes_through() {
        let work = TempDir::new().unwrap();

        recap()
            .arg("trace")
            .args(["-C", work.path().to_str().unwrap()])
            .args(["--", "sh", "-c", "exit 5"])
            .assert()
            .code(5);
    }
}
