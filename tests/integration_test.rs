use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn rompatch(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rompatch"))
        .args(args)
        .output()
        .expect("Failed to run rompatch")
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{} failed:\nstdout: {}\nstderr: {}",
        what,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn ips_patch(records: &[(u32, &[u8])], rle: &[(u32, u16, u8)]) -> Vec<u8> {
    let mut out = b"PATCH".to_vec();
    for (offset, data) in records {
        out.extend_from_slice(&offset.to_be_bytes()[1..]);
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
    }
    for (offset, run, value) in rle {
        out.extend_from_slice(&offset.to_be_bytes()[1..]);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&run.to_be_bytes());
        out.push(*value);
    }
    out.extend_from_slice(b"EOF");
    out
}

fn ups_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let group = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(0x80 | group);
            return;
        }
        out.push(group);
        value -= 1;
    }
}

/// Build a UPS patch turning `base` into `target`. Sizes must be within the
/// same power of two for the XOR tail to line up with the padded ROM.
fn ups_patch(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = b"UPS1".to_vec();
    ups_varint(base.len() as u64, &mut out);
    ups_varint(target.len() as u64, &mut out);

    let padded_base = |i: usize| {
        if i < base.len() {
            base[i]
        } else {
            0
        }
    };
    let mut last = 0usize;
    let mut i = 0usize;
    while i < target.len() {
        if padded_base(i) == target[i] {
            i += 1;
            continue;
        }
        ups_varint((i - last) as u64, &mut out);
        while i < target.len() && padded_base(i) != target[i] {
            out.push(padded_base(i) ^ target[i]);
            i += 1;
        }
        out.push(0);
        i += 1;
        last = i;
    }
    out.extend_from_slice(&[0u8; 12]);
    out
}

#[test]
fn test_apply_ips_with_explicit_patch() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.gba");
    let patch = dir.path().join("fix.ips");
    let out = dir.path().join("out.gba");

    let original: Vec<u8> = (0..64u8).collect();
    fs::write(&rom, &original).unwrap();
    fs::write(
        &patch,
        ips_patch(&[(0x10, &[0xAA, 0xBB, 0xCC, 0xDD])], &[(0x30, 4, 0xEE)]),
    )
    .unwrap();

    let output = rompatch(&[
        "apply",
        "--rom",
        path_str(&rom),
        "--patch",
        path_str(&patch),
        "--output",
        path_str(&out),
    ]);
    assert_success(&output, "apply");

    let mut expected = original.clone();
    expected[0x10..0x14].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
    expected[0x30..0x34].copy_from_slice(&[0xEE; 4]);
    assert_eq!(fs::read(&out).unwrap(), expected);
    // source ROM is left alone
    assert_eq!(fs::read(&rom).unwrap(), original);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("IPS patch applied"), "stdout: {stdout}");
}

#[test]
fn test_apply_finds_sibling_ups_and_grows_rom() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("hack.gba");

    let base: Vec<u8> = vec![0x42; 40];
    let mut target = base.clone();
    target[3] = 0x00;
    target[10] = 0x99;
    target.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05]);
    fs::write(&rom, &base).unwrap();
    fs::write(dir.path().join("hack.ups"), ups_patch(&base, &target)).unwrap();

    let output = rompatch(&["apply", "--rom", path_str(&rom), "--buffer-size", "7"]);
    assert_success(&output, "apply");

    let patched = fs::read(dir.path().join("hack.patched.gba")).unwrap();
    assert_eq!(patched.len(), 64);
    assert_eq!(&patched[..45], target.as_slice());
    assert_eq!(&patched[45..], &[0xFF; 19]);
}

#[test]
fn test_invalid_patch_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.gba");
    let patch = dir.path().join("game.ips");
    fs::write(&rom, [0u8; 16]).unwrap();
    fs::write(&patch, b"not a patch at all").unwrap();

    let output = rompatch(&["apply", "--rom", path_str(&rom)]);
    assert_success(&output, "apply");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Skipping"), "stdout: {stdout}");
    assert!(!dir.path().join("game.patched.gba").exists());
}

#[test]
fn test_truncated_patch_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.gba");
    let out = dir.path().join("out.gba");
    let mut patch_bytes = ips_patch(&[(0, &[1, 2, 3, 4])], &[]);
    patch_bytes.truncate(patch_bytes.len() - 4);
    fs::write(&rom, [0u8; 16]).unwrap();
    fs::write(dir.path().join("game.ips"), patch_bytes).unwrap();

    let output = rompatch(&["apply", "--rom", path_str(&rom), "-o", path_str(&out)]);
    assert!(!output.status.success());
    assert!(!out.exists());
}

#[test]
fn test_missing_patch_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("lonely.gba");
    fs::write(&rom, [0u8; 4]).unwrap();

    let output = rompatch(&["apply", "--rom", path_str(&rom)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No .ips or .ups patch"), "stderr: {stderr}");
}

#[test]
fn test_detect_reports_format() {
    let dir = tempfile::tempdir().unwrap();
    let ups = dir.path().join("a.ups");
    let ips = dir.path().join("b.ips");
    let junk = dir.path().join("c.bin");
    fs::write(&ups, ups_patch(&[0; 8], &[1; 12])).unwrap();
    fs::write(&ips, ips_patch(&[], &[])).unwrap();
    fs::write(&junk, b"XYZW").unwrap();

    let output = rompatch(&["detect", "--patch", path_str(&ups)]);
    assert_success(&output, "detect ups");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("UPS patch"), "stdout: {stdout}");
    assert!(stdout.contains("Base size:    0x8"), "stdout: {stdout}");
    assert!(stdout.contains("Patched size: 0xC"), "stdout: {stdout}");

    let output = rompatch(&["detect", "--patch", path_str(&ips)]);
    assert_success(&output, "detect ips");
    assert!(String::from_utf8_lossy(&output.stdout).contains("IPS patch"));

    let output = rompatch(&["detect", "--patch", path_str(&junk)]);
    assert!(!output.status.success());
}

#[test]
fn test_batch_patches_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir_all(&sub).unwrap();

    fs::write(dir.path().join("one.gba"), [0u8; 8]).unwrap();
    fs::write(dir.path().join("one.ips"), ips_patch(&[(1, &[7, 7])], &[])).unwrap();
    fs::write(sub.join("two.gba"), [5u8; 8]).unwrap();
    fs::write(sub.join("two.ups"), ups_patch(&[5; 8], &[5, 5, 5, 5, 9, 5, 5, 5])).unwrap();
    fs::write(dir.path().join("three.gba"), [1u8; 8]).unwrap();
    fs::write(dir.path().join("three.ips"), b"garbage!").unwrap();
    fs::write(dir.path().join("unpaired.gba"), [3u8; 8]).unwrap();

    let output = rompatch(&["batch", "--dir", path_str(dir.path()), "--in-place"]);
    assert_success(&output, "batch");

    assert_eq!(fs::read(dir.path().join("one.gba")).unwrap(), [0, 7, 7, 0, 0, 0, 0, 0]);
    assert_eq!(fs::read(sub.join("two.gba")).unwrap(), [5, 5, 5, 5, 9, 5, 5, 5]);
    assert_eq!(fs::read(dir.path().join("three.gba")).unwrap(), [1u8; 8]);
    assert_eq!(fs::read(dir.path().join("unpaired.gba")).unwrap(), [3u8; 8]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Patched: 2"), "stdout: {stdout}");
    assert!(stdout.contains("Skipped: 1"), "stdout: {stdout}");
    assert!(stdout.contains("Failed: 0"), "stdout: {stdout}");
}

#[test]
fn test_verbose_flag_raises_log_level() {
    let dir = tempfile::tempdir().unwrap();
    let rom = dir.path().join("game.gba");
    let patch = dir.path().join("game.ips");
    let out = dir.path().join("out.gba");
    fs::write(&rom, [0u8; 8]).unwrap();
    fs::write(&patch, ips_patch(&[(2, &[0x5A])], &[])).unwrap();
    let args = [
        "apply",
        "--rom",
        path_str(&rom),
        "--patch",
        path_str(&patch),
        "-o",
        path_str(&out),
    ];

    let run = |extra: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_rompatch"))
            .env_remove("RUST_LOG")
            .args(extra)
            .args(args)
            .output()
            .expect("Failed to run rompatch")
    };

    let output = run(&["-vv"]);
    assert_success(&output, "apply -vv");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("DEBUG"), "stderr: {stderr}");
    assert!(stderr.contains("IPS: applied 1 records"), "stderr: {stderr}");

    let output = run(&[]);
    assert_success(&output, "apply");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("DEBUG"), "stderr: {stderr}");
    assert!(!stderr.contains("INFO"), "stderr: {stderr}");
}
