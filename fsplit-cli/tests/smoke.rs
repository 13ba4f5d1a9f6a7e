use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_random(path: &std::path::Path, bytes: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    std::fs::write(path, &data).unwrap();
    data
}

#[test]
fn split_verify_merge_happy_path() {
    let td = assert_fs::TempDir::new().unwrap();
    let src = td.child("demo.bin");
    let data = write_random(src.path(), 200 * 1024 + 3, 1);

    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["split", "demo.bin", "parts", "--parts", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo.bin.split_metadata"));

    td.child("parts/demo.bin.part1").assert(predicate::path::is_file());
    td.child("parts/demo.bin.part3").assert(predicate::path::is_file());
    td.child("parts/demo.bin.split_metadata")
        .assert(predicate::str::contains("\"originalFileName\": \"demo.bin\""));

    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["verify", "parts/demo.bin.split_metadata"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["merge", "parts/demo.bin.split_metadata", "restored.bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    assert_eq!(std::fs::read(td.child("restored.bin").path()).unwrap(), data);
}

#[test]
fn part_size_picks_the_count() {
    let td = assert_fs::TempDir::new().unwrap();
    write_random(td.child("f.bin").path(), 100 * 1024, 2);

    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["split", "f.bin", "out", "--part-size", "32K", "--prefix", "chunk"])
        .assert()
        .success();

    // 100K / 32K -> 4 parts, the last one holding the remainder
    td.child("out/chunk.part4").assert(predicate::path::is_file());
    td.child("out/chunk.part5").assert(predicate::path::missing());

    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["info", "out/chunk.split_metadata"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Name:  f.bin"))
        .stdout(predicate::str::contains("Parts: 4"))
        .stdout(predicate::str::contains("Part 4"));
}

#[test]
fn one_part_is_refused() {
    let td = assert_fs::TempDir::new().unwrap();
    write_random(td.child("x.bin").path(), 4096, 3);
    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["split", "x.bin", "out", "--parts", "1"])
        .assert()
        .failure();
    td.child("out").assert(predicate::path::missing());
}

#[test]
fn list_finds_descriptors() {
    let td = assert_fs::TempDir::new().unwrap();
    write_random(td.child("a.bin").path(), 8192, 4);
    write_random(td.child("b.bin").path(), 8192, 5);
    for f in ["a.bin", "b.bin"] {
        Command::cargo_bin("fsplit").unwrap()
            .current_dir(td.path())
            .args(["split", f, "out", "--parts", "2"])
            .assert()
            .success();
    }
    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["list", "out"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.bin.split_metadata"))
        .stdout(predicate::str::contains("b.bin.split_metadata"))
        .stdout(predicate::str::contains("2 parts"));

    td.child("empty").create_dir_all().unwrap();
    Command::cargo_bin("fsplit").unwrap()
        .current_dir(td.path())
        .args(["list", "empty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no metadata file found"));
}
