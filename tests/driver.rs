//! Host compiles, optimization records and job admission.

mod common;

use std::sync::Arc;

use asmview::{AsmOutput, BuildRequest, Driver, DriverConfig, Filters};
use common::*;

fn request(options: &[&str]) -> BuildRequest {
    BuildRequest {
        compiler_id: "gcc".into(),
        source: "int square(int x) { return x * x; }".into(),
        user_options: options.iter().map(|o| o.to_string()).collect(),
        ..BuildRequest::default()
    }
}

#[tokio::test]
async fn test_text_output() {
    init_logging();
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "");
    let driver = Driver::with_local_processes(config(tools.path(), vec![generic_descriptor(gcc)]))
        .unwrap();

    let result = driver.compile(&request(&["-O2"])).await.unwrap();
    assert_eq!(result.code, 0);
    assert_eq!(result.asm.as_text(), Some("square:\n\tret\n"));
    assert!(result.devices.is_empty());
    assert!(result.opt_output.is_empty());
    assert!(result.timings.objdump_ms.is_none());

    let options = &result.compilation_options;
    assert_eq!(&options[..2], ["-g", "-o"]);
    assert_eq!(options[3], "-S");
    assert_eq!(options[4], "-O2");
    assert!(options[5].ends_with("example.cpp"));
}

#[tokio::test]
async fn test_optimization_record_is_collected() {
    let tools = tempfile::tempdir().unwrap();
    // The record lands next to output.s in the job directory.
    let gcc = fake_compiler(
        tools.path(),
        "g++",
        r#"cat > output.opt.yaml <<'YAML'
--- !Missed
Pass:            inline
Name:            NoDefinition
DebugLoc:        { File: example.cpp, Line: 1, Column: 20 }
Function:        square
Args:
  - String:          'not inlined'
...
YAML"#,
    );
    let driver = Driver::with_local_processes(config(tools.path(), vec![generic_descriptor(gcc)]))
        .unwrap();

    let result = driver
        .compile(&request(&["-O2", "-fsave-optimization-record"]))
        .await
        .unwrap();
    assert_eq!(result.code, 0);
    assert_eq!(result.opt_output.len(), 1);
    let remark = &result.opt_output[0];
    assert_eq!(remark.pass, "inline");
    assert_eq!(remark.function, "square");
    assert!(!result
        .compilation_options
        .iter()
        .any(|arg| arg.starts_with("-foptimization-record-file")));
}

#[tokio::test]
async fn test_requested_report_keeps_exit_code() {
    let tools = tempfile::tempdir().unwrap();
    let nvcc = fake_compiler(tools.path(), "nvcc", "");
    let nvdisasm = fake_nvdisasm(tools.path());
    let driver = Driver::with_local_processes(config(
        tools.path(),
        vec![nvcc_descriptor(nvcc, nvdisasm, "12.2.140")],
    ))
    .unwrap();

    for flag in ["-opt-info", "--optimization-info", "-fsave-optimization-record"] {
        let request = BuildRequest {
            compiler_id: "nvcc".into(),
            source: "__global__ void k() {}".into(),
            user_options: vec!["-O3".into(), flag.into()],
            ..BuildRequest::default()
        };
        let result = driver.compile(&request).await.unwrap();
        assert_eq!(result.code, 0, "{}: {}", flag, result.stderr);
        // No record was written, so there is nothing to report.
        assert!(result.opt_output.is_empty());
    }
}

#[tokio::test]
async fn test_binary_output_through_external_parser() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "");
    let objdump = write_tool(tools.path(), "objdump", "echo 'square: ret'");
    let parser = write_tool(
        tools.path(),
        "asm-parser",
        r#"cat > /dev/null
echo '{"asm":[{"text":"square:"},{"text":"  ret"}],"labelDefinitions":{"square":1}}'"#,
    );
    let mut descriptor = generic_descriptor(gcc);
    descriptor.objdumper = Some(objdump);
    descriptor.external_parser = Some(parser);
    let driver = Driver::with_local_processes(config(tools.path(), vec![descriptor])).unwrap();

    let mut request = request(&[]);
    request.filters = Filters::from_names(["binary", "labels"]);
    let result = driver.compile(&request).await.unwrap();

    assert!(result.compilation_options.iter().any(|arg| arg == "-c"));
    let AsmOutput::Structured(asm) = &result.asm else {
        panic!("expected structured asm, got {:?}", result.asm);
    };
    assert_eq!(asm[1]["text"], "  ret");
    assert!(result.timings.objdump_ms.is_some());
}

#[tokio::test]
async fn test_masked_sandbox_through_external_parser() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "");
    let objdump = write_tool(tools.path(), "objdump", r#"echo "objdump $*""#);
    let parser = write_tool(
        tools.path(),
        "asm-parser",
        r#"first=$(head -n 1)
printf '{"asm":[{"text":"%s"}]}\n' "$first""#,
    );
    let mut descriptor = generic_descriptor(gcc);
    descriptor.objdumper = Some(objdump);
    descriptor.external_parser = Some(parser);
    let mut config = config(tools.path(), vec![descriptor]);
    config.sandbox.mask_root = Some("/app".into());
    let driver = Driver::with_local_processes(config).unwrap();

    let mut request = request(&[]);
    request.filters = Filters::from_names(["binary"]);
    let result = driver.compile(&request).await.unwrap();

    let AsmOutput::Structured(asm) = &result.asm else {
        panic!("expected structured asm, got {:?}", result.asm);
    };
    let text = asm[0]["text"].as_str().unwrap();
    // The objdumper only ever sees masked paths.
    assert!(text.starts_with("objdump -d /app/"), "{}", text);
}

#[tokio::test]
async fn test_binary_output_through_objdump() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "");
    let objdump = write_tool(tools.path(), "objdump", "printf 'square:\\r\\n  ret   \\n\\n'");
    let mut descriptor = generic_descriptor(gcc);
    descriptor.objdumper = Some(objdump);
    let driver = Driver::with_local_processes(config(tools.path(), vec![descriptor])).unwrap();

    let mut request = request(&[]);
    request.filters = Filters::from_names(["binary"]);
    let result = driver.compile(&request).await.unwrap();
    assert_eq!(result.asm.as_text(), Some("square:\n  ret"));
}

#[tokio::test]
async fn test_jobs_share_bounded_slots() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "sleep 0.05");
    let mut config = config(tools.path(), vec![generic_descriptor(gcc)]);
    config.limits.max_concurrent_jobs = 1;
    let driver = Arc::new(Driver::with_local_processes(config).unwrap());

    let mut handles = Vec::new();
    for i in 0..4 {
        let driver = Arc::clone(&driver);
        handles.push(tokio::spawn(async move {
            let mut request = request(&["-O1"]);
            request.high_priority = i % 2 == 0;
            driver.compile(&request).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().code, 0);
    }
    assert_eq!(driver.scheduler().available(), 1);
}

#[tokio::test]
async fn test_job_timeout_cancels() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "sleep 5");
    let mut config = config(tools.path(), vec![generic_descriptor(gcc)]);
    config.limits.job_timeout_ms = 100;
    let driver = Driver::with_local_processes(config).unwrap();

    let err = driver.compile(&request(&[])).await.unwrap_err();
    assert_eq!(err.stage(), asmview::Stage::Scheduling);
    assert_eq!(driver.scheduler().available(), 2);
}

#[tokio::test]
async fn test_list_and_health() {
    let tools = tempfile::tempdir().unwrap();
    let gcc = fake_compiler(tools.path(), "g++", "");
    let nvcc = fake_compiler(tools.path(), "nvcc", NVCC_KEEP_FILES);
    let nvdisasm = fake_nvdisasm(tools.path());
    let driver = Driver::with_local_processes(config(
        tools.path(),
        vec![
            generic_descriptor(gcc),
            nvcc_descriptor(nvcc, nvdisasm, "12.2.140"),
        ],
    ))
    .unwrap();

    assert_eq!(driver.compilers(None).len(), 2);
    let ptx: Vec<&str> = driver
        .compilers(Some("ptx"))
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ptx, vec!["nvcc"]);

    let report = driver.health_check().await.unwrap();
    assert_eq!(report.compilers, 2);
    assert!(report.missing_tools.is_empty(), "{:?}", report.missing_tools);

    let empty = Driver::with_local_processes(DriverConfig::default()).unwrap();
    assert!(empty.health_check().await.is_err());
}
