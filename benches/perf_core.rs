use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crucible::diagnostics::{parse_lint, parse_sanitizer, render_machine};
use crucible::gates::heuristics::{has_threading_indicators, mask_comments_and_literals};
use crucible::harness::AcceptanceCriteria;

fn synthetic_lint_output(lines: usize) -> String {
    let mut out = String::with_capacity(lines * 96);
    for i in 0..lines {
        match i % 3 {
            0 => out.push_str(&format!(
                "src/module_{:03}.cpp:{}:{}: warning: narrowing conversion from 'long' to 'int' [bugprone-narrowing-conversions]\n",
                i % 40,
                i + 1,
                (i % 60) + 1
            )),
            1 => out.push_str(&format!("    int value_{} = compute();\n", i)),
            _ => out.push_str("            ^\n"),
        }
    }
    out
}

fn synthetic_sanitizer_output(reports: usize) -> String {
    let mut out = String::new();
    for i in 0..reports {
        out.push_str(&format!(
            "==4242==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x6020000{:05x} at pc 0x4f3c2a\n",
            i
        ));
        out.push_str("READ of size 4 at 0x602000000014 thread T0\n");
        for frame in 0..12 {
            out.push_str(&format!(
                "    #{} 0x4f3c{:02x} in helper_{} /work/src/buffer.cpp:{}:5\n",
                frame,
                frame,
                frame,
                100 + frame
            ));
        }
        out.push_str("SUMMARY: AddressSanitizer: heap-buffer-overflow /work/src/buffer.cpp:100:5 in helper_0\n");
    }
    out
}

fn synthetic_source(functions: usize) -> String {
    let mut out = String::from("#include <vector>\n// std::thread is mentioned only in this comment\n");
    for i in 0..functions {
        out.push_str(&format!(
            "int f{i}(const std::vector<int>& v) {{\n    const char* s = \"pthread_create({i})\";\n    int total = 0;\n    for (int x : v) {{ total += x * {i}; }}\n    return total + (s[0] == 'p');\n}}\n"
        ));
    }
    out
}

fn bench_parse_lint(c: &mut Criterion) {
    let output = synthetic_lint_output(6_000);
    c.bench_function("parse_lint_6k_lines", |b| {
        b.iter(|| {
            let diagnostics = parse_lint(black_box(&output));
            black_box(diagnostics.len());
        });
    });

    let diagnostics = parse_lint(&output);
    c.bench_function("render_machine_capped", |b| {
        b.iter(|| black_box(render_machine(black_box(&diagnostics), 30)));
    });
}

fn bench_parse_sanitizer(c: &mut Criterion) {
    let output = synthetic_sanitizer_output(200);
    c.bench_function("parse_sanitizer_200_reports", |b| {
        b.iter(|| {
            let diagnostics = parse_sanitizer(black_box(&output));
            black_box(diagnostics.len());
        });
    });
}

fn bench_text_heuristics(c: &mut Criterion) {
    let source = synthetic_source(800);
    c.bench_function("mask_comments_and_literals", |b| {
        b.iter(|| black_box(mask_comments_and_literals(black_box(&source)).len()));
    });
    c.bench_function("threading_indicators", |b| {
        b.iter(|| black_box(has_threading_indicators(black_box(&source))));
    });

    let dod = (0..500)
        .map(|i| format!("- f{i}(v) should return {}\n", i * 2))
        .collect::<String>();
    c.bench_function("parse_definition_of_done", |b| {
        b.iter(|| black_box(AcceptanceCriteria::parse(black_box(&dod)).examples.len()));
    });
}

criterion_group!(
    perf_core,
    bench_parse_lint,
    bench_parse_sanitizer,
    bench_text_heuristics
);
criterion_main!(perf_core);
