use std::env;
use std::path::{Path, PathBuf};

/// Encoder libraries probed on Unix-like hosts when `FFMPEG_DIR` points at a
/// custom build.
const REQUIRED_LIBRARIES: [&str; 3] = ["avcodec", "avformat", "swresample"];

fn main() {
    println!("cargo:rerun-if-env-changed=FFMPEG_DIR");
    println!("cargo:rerun-if-env-changed=VCPKG_ROOT");
    println!("cargo:rerun-if-env-changed=VCPKGRS_DYNAMIC");
    println!("cargo:rerun-if-env-changed=VCPKGRS_TRIPLET");

    // The pure-Rust pipeline needs no native libraries.
    if env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if let Some(ffmpeg_dir) = env::var_os("FFMPEG_DIR").map(PathBuf::from) {
        check_custom_build(&ffmpeg_dir, &target_os);
        return;
    }
    if target_os == "windows" {
        suggest_vcpkg();
    }
}

fn check_custom_build(ffmpeg_dir: &Path, target_os: &str) {
    let lib_dir = ffmpeg_dir.join("lib");
    if !lib_dir.is_dir() {
        println!(
            "cargo:warning=FFMPEG_DIR is set to {} but it has no lib directory.",
            ffmpeg_dir.display(),
        );
        return;
    }
    if target_os == "windows" {
        return;
    }

    let entries: Vec<String> = match std::fs::read_dir(&lib_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => return,
    };
    for library in REQUIRED_LIBRARIES {
        let prefix = format!("lib{library}");
        if !entries.iter().any(|name| name.starts_with(&prefix)) {
            println!(
                "cargo:warning=lib{library} was not found in {}; the H.264/AAC pipeline needs it.",
                lib_dir.display(),
            );
        }
    }
}

fn suggest_vcpkg() {
    let vcpkg_root = match env::var("VCPKG_ROOT") {
        Ok(value) => value,
        Err(_) => {
            println!(
                "cargo:warning=FFMPEG_DIR is not set. On Windows, install FFmpeg (with x264 and an AAC encoder) via vcpkg and set VCPKG_ROOT + FFMPEG_DIR."
            );
            return;
        }
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let ffmpeg_dir = PathBuf::from(&vcpkg_root).join("installed").join(&triplet);

    if ffmpeg_dir.exists() {
        println!(
            "cargo:warning=Detected vcpkg FFmpeg at {}. Set FFMPEG_DIR={} to make ffmpeg-sys-next discovery explicit.",
            ffmpeg_dir.display(),
            ffmpeg_dir.display(),
        );
        if env::var_os("VCPKGRS_DYNAMIC").is_none() {
            println!(
                "cargo:warning=Consider setting VCPKGRS_DYNAMIC=1 when using vcpkg dynamic FFmpeg builds on Windows."
            );
        }
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but no FFmpeg install was found at {}.",
            ffmpeg_dir.display(),
        );
    }
}
