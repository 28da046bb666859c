//! Fake toolchains for the integration tests.
//!
//! Every tool is a small shell script written into a temporary directory,
//! so the tests exercise real child processes without needing a CUDA
//! installation.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use asmview::{CompilerDescriptor, CompilerKind, DriverConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write an executable `/bin/sh` script.
pub fn write_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// Scans the arguments for `-o`, writes a small listing there and reports
/// the output path on stdout. Like gcc, it rejects clang's
/// `-foptimization-record-file=`. `extra` runs afterwards in the job directory.
pub fn fake_compiler(dir: &Path, name: &str, extra: &str) -> PathBuf {
    let body = format!(
        r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    *-foptimization-record-file=*)
      echo "error: unrecognized command-line option '$1'" >&2
      exit 1 ;;
  esac
  shift
done
printf 'square:\n\tret\n' > "$out"
echo "writing $out"
{}"#,
        extra
    );
    write_tool(dir, name, &body)
}

/// Drops the files `nvcc -keep` leaves behind for two architectures.
pub const NVCC_KEEP_FILES: &str = r#"printf '.version 7.8\n.target sm_75\n.visible .entry _Z6squarePi()\n{\n\tret;\n}\n' > example.ptx
printf 'cubin' > example.sm_75.cubin
printf 'cubin' > example.sm_80.cubin
printf 'int main() {}' > example.cudafe1.cpp"#;

/// Prints its own arguments followed by one SASS instruction with source
/// info and an encoding comment.
pub fn fake_nvdisasm(dir: &Path) -> PathBuf {
    write_tool(
        dir,
        "nvdisasm",
        r#"echo "// nvdisasm $*"
printf '//## File "example.cu", line 3\n        /*0000*/ MOV R1, c[0x0][0x28] ; /* 0x00000a0000017a02 */\n'"#,
    )
}

pub fn nvcc_descriptor(exe: PathBuf, nvdisasm: PathBuf, version: &str) -> CompilerDescriptor {
    CompilerDescriptor {
        id: "nvcc".into(),
        name: format!("NVCC {}", version),
        kind: CompilerKind::Nvcc,
        exe,
        version: version.into(),
        instruction_set: "ptx".into(),
        objdumper: None,
        device_disassembler: Some(nvdisasm),
        external_parser: None,
        demangler: None,
        supports_opt_output: true,
        opt_args: Vec::new(),
        supports_device_asm_view: true,
        env: BTreeMap::new(),
    }
}

pub fn generic_descriptor(exe: PathBuf) -> CompilerDescriptor {
    CompilerDescriptor {
        id: "gcc".into(),
        name: "GCC 13.2".into(),
        kind: CompilerKind::Generic,
        exe,
        version: "13.2.0".into(),
        instruction_set: "amd64".into(),
        objdumper: None,
        device_disassembler: None,
        external_parser: None,
        demangler: None,
        supports_opt_output: true,
        opt_args: Vec::new(),
        supports_device_asm_view: false,
        env: BTreeMap::new(),
    }
}

/// Configuration keeping job directories under `root/jobs`.
pub fn config(root: &Path, compilers: Vec<CompilerDescriptor>) -> DriverConfig {
    let mut config = DriverConfig::default();
    config.sandbox.root = root.join("jobs");
    config.compilers = compilers;
    config
}
