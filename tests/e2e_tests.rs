use finch::runtime_io::BufferIo;
use std::fs;
use std::path::PathBuf;

/// E2E 통합 테스트: tests/programs/ 디렉터리의 .fin 프로그램을 통째로
/// 실행하고 출력을 확인한다.

fn get_test_programs() -> Vec<PathBuf> {
    let test_dir = PathBuf::from("tests/programs");
    let mut programs = vec![];
    if let Ok(entries) = fs::read_dir(&test_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("fin") {
                programs.push(path);
            }
        }
    }
    programs.sort();
    programs
}

fn run_test_program(path: &PathBuf) -> Result<String, String> {
    let mut interp = finch::Interpreter::new();
    let mut io = BufferIo::new();
    interp
        .run_file(path, &mut io)
        .map_err(|e| format!("error in {}: {:?}", path.display(), e))?;
    Ok(io.take_output())
}

#[test]
fn test_e2e_all_programs() {
    let programs = get_test_programs();
    assert!(
        !programs.is_empty(),
        "no test programs found in tests/programs/"
    );

    let mut failures = vec![];
    for path in programs {
        if let Err(err) = run_test_program(&path) {
            failures.push(err);
        }
    }
    assert!(failures.is_empty(), "failed programs:\n{}", failures.join("\n"));
}

macro_rules! test_program {
    ($test_name:ident, $filename:literal, expect = $expected:literal) => {
        #[test]
        fn $test_name() {
            let _ = include_str!(concat!("programs/", $filename));

            let path = PathBuf::from(concat!("tests/programs/", $filename));
            match run_test_program(&path) {
                Ok(output) => assert_eq!(output, $expected, "unexpected output of {}", $filename),
                Err(err) => panic!("{} should execute successfully: {}", $filename, err),
            }
        }
    };

    ($test_name:ident, $filename:literal, contains = [$($expected:literal),*]) => {
        #[test]
        fn $test_name() {
            let _ = include_str!(concat!("programs/", $filename));

            let path = PathBuf::from(concat!("tests/programs/", $filename));
            match run_test_program(&path) {
                Ok(output) => {
                    $(
                        assert!(
                            output.contains($expected),
                            "{}: output should contain '{}'\nactual output:\n{}",
                            $filename,
                            $expected,
                            output
                        );
                    )*
                }
                Err(err) => panic!("{} should execute successfully: {}", $filename, err),
            }
        }
    };
}

test_program!(test_arith, "arith.fin", expect = "5\n5.0\n3\n3.5\n3\n-3\nab\n");
test_program!(test_fib_iter, "fib_iter.fin", expect = "55\n6765\n");
test_program!(test_func_rec, "func_rec.fin", expect = "3628800\n9\n");
test_program!(test_branch, "branch.fin", expect = "A\nB\nC\nF\n");
test_program!(test_closures, "closures.fin", expect = "3\n1\n42\n");
test_program!(test_classes, "classes.fin", expect = "25\n100\n2\n");
test_program!(
    test_inheritance,
    "inheritance.fin",
    expect = "circle!\n12\ncircle\n"
);
test_program!(
    test_arrays,
    "arrays.fin",
    expect = "4\n5\n10\n30\n3\n[1, two, 3.0]\n"
);
test_program!(test_globals, "globals.fin", expect = "3\n99\n99\n");
test_program!(
    test_using_units,
    "using_units.fin",
    contains = ["42", "from main"]
);

#[test]
fn test_runtime_error_reaches_embedder() {
    let dir = std::env::temp_dir().join(format!("finch-e2e-{}", std::process::id()));
    let _ = fs::create_dir_all(&dir);
    let path = dir.join("div_zero.fin");
    fs::write(&path, "print(1 / 0)\n").unwrap();

    let result = run_test_program(&path);
    assert!(result.is_err(), "division by zero must be fatal");
}
