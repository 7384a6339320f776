// Criterion benchmark suite: compile and search timings.
//
// Run: cargo bench
// Specific group: cargo bench -- search
// HTML report: target/criterion/report/index.html

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rewind::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn word_run_tree() -> SyntaxTree {
    // (\w+)\s
    SyntaxTree::new(
        Node::concat(vec![
            Node::capture(
                1,
                Node::Setloop { class: CharClass::word(), min: 1, max: MAX_REPEAT, opts: 0 },
            ),
            Node::set(CharClass::space()),
        ]),
        options::NONE,
        2,
    )
}

fn literal_tree() -> SyntaxTree {
    SyntaxTree::new(Node::multi("Sherlock Holmes"), options::NONE, 1)
}

fn backtracking_tree() -> SyntaxTree {
    // (a+)+$ style pathological nesting, bounded to keep the bench honest
    SyntaxTree::new(
        Node::concat(vec![
            Node::greedy_loop(
                1,
                8,
                Node::capture(1, Node::Oneloop { ch: 'a', min: 1, max: MAX_REPEAT, opts: 0 }),
            ),
            Node::one('b'),
        ]),
        options::NONE,
        2,
    )
}

fn haystack() -> String {
    let mut text = String::new();
    for i in 0..2000 {
        text.push_str("lorem ipsum dolor ");
        if i % 500 == 499 {
            text.push_str("Sherlock Holmes ");
        }
    }
    text
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.bench_function("word_run", |b| {
        let tree = word_run_tree();
        b.iter(|| Regex::from_tree(black_box(&tree)).unwrap());
    });
    group.bench_function("literal", |b| {
        let tree = literal_tree();
        b.iter(|| Regex::from_tree(black_box(&tree)).unwrap());
    });
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let text = haystack();
    let mut group = c.benchmark_group("search");

    group.bench_function("literal_plain", |b| {
        let re = Regex::from_tree(&literal_tree()).unwrap();
        b.iter(|| black_box(re.find(black_box(&text))));
    });

    group.bench_function("literal_boyer_moore", |b| {
        let re = Regex::with_hints(
            &literal_tree(),
            ScanHints {
                prefix: Some(PrefixHint {
                    text: "Sherlock Holmes".into(),
                    case_insensitive: false,
                }),
                ..ScanHints::default()
            },
        )
        .unwrap();
        b.iter(|| black_box(re.find(black_box(&text))));
    });

    group.bench_function("word_runs_iter", |b| {
        let re = Regex::from_tree(&word_run_tree()).unwrap();
        b.iter(|| re.find_iter(black_box(&text)).count());
    });

    group.bench_function("nested_backtracking", |b| {
        let re = Regex::from_tree(&backtracking_tree()).unwrap();
        let input = "aaaaaaaaaaaaaaaa"; // no terminator: exhaustive failure
        b.iter(|| black_box(re.find(black_box(input))));
    });

    group.finish();
}

criterion_group!(benches, bench_compile, bench_search);
criterion_main!(benches);
