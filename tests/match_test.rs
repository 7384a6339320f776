// match_test.rs - End-to-end matching through the public API.

use std::collections::HashMap;
use std::time::Duration;

use rewind::prelude::*;

fn re(tree: SyntaxTree) -> Regex {
    Regex::from_tree(&tree).unwrap()
}

fn span(m: &Match) -> (usize, usize) {
    (m.start(), m.end())
}

// === Concrete scenarios ===

#[test]
fn plus_capture_then_literal() {
    // (a+)b on "aaab"
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::capture(1, Node::Oneloop { ch: 'a', min: 1, max: MAX_REPEAT, opts: 0 }),
            Node::one('b'),
        ]),
        options::NONE,
        2,
    );
    let re_obj = re(tree);
    let m = re_obj.find("aaab").unwrap();
    assert_eq!(span(&m), (0, 4));
    let g = m.group(1).unwrap();
    assert_eq!(g.range(), 0..3);
    assert_eq!(g.as_str(), "aaa");
}

#[test]
fn anchored_named_digits_ecma() {
    // ^(?<num>\d+)$ with the ECMAScript option on "12345"
    let mut names: HashMap<Box<str>, i32> = HashMap::new();
    names.insert("num".into(), 1);
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::Beginning,
            Node::capture(
                1,
                Node::Setloop { class: CharClass::ecma_digit(), min: 1, max: MAX_REPEAT, opts: 0 },
            ),
            Node::EndZ,
        ]),
        options::ECMASCRIPT,
        2,
    )
    .with_names(names);
    let regex = re(tree);
    let m = regex.find("12345").unwrap();
    assert_eq!(span(&m), (0, 5));
    assert_eq!(m.group_named("num").unwrap().as_str(), "12345");
    assert!(regex.find("12345x").is_none());
    assert!(regex.find("x12345").is_none());
}

#[test]
fn lazy_dot_stops_at_first_terminator() {
    // a.*?b on "a xx b yy b"
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::one('a'),
            Node::Notonelazy { ch: '\n', min: 0, max: MAX_REPEAT, opts: 0 },
            Node::one('b'),
        ]),
        options::NONE,
        1,
    );
    let re_obj = re(tree);
    let m = re_obj.find("a xx b yy b").unwrap();
    assert_eq!(span(&m), (0, 6));
    assert_eq!(m.as_str(), "a xx b");
}

#[test]
fn lookahead_does_not_advance() {
    // (?=abc)\w+ on "abcdef"
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::require(Node::multi("abc")),
            Node::Setloop { class: CharClass::word(), min: 1, max: MAX_REPEAT, opts: 0 },
        ]),
        options::NONE,
        1,
    );
    let re_obj = re(tree);
    let m = re_obj.find("abcdef").unwrap();
    assert_eq!(span(&m), (0, 6));
    assert_eq!(m.as_str(), "abcdef");
}

#[test]
fn backreference_repeats_word() {
    // (\w+)\s\1 on "hello hello"
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::capture(
                1,
                Node::Setloop { class: CharClass::word(), min: 1, max: MAX_REPEAT, opts: 0 },
            ),
            Node::set(CharClass::space()),
            Node::Ref { group: 1, opts: 0 },
        ]),
        options::NONE,
        2,
    );
    let re_obj = re(tree);
    let m = re_obj.find("hello hello").unwrap();
    assert_eq!(span(&m), (0, 11));
    assert_eq!(m.group(1).unwrap().range(), 0..5);
}

#[test]
fn empty_star_on_empty_input() {
    // a* on "" matches empty, and next_match cannot regress
    let tree = SyntaxTree::new(
        Node::Oneloop { ch: 'a', min: 0, max: MAX_REPEAT, opts: 0 },
        options::NONE,
        1,
    );
    let re_obj = re(tree);
    let m = re_obj.find("").unwrap();
    assert_eq!(span(&m), (0, 0));
    assert!(m.is_empty());
    assert!(m.next_match().unwrap().is_none());
}

// === Properties ===

#[test]
fn next_match_start_strictly_increases() {
    // a* over mixed input: every restart position is strictly larger
    let tree = SyntaxTree::new(
        Node::Oneloop { ch: 'a', min: 0, max: MAX_REPEAT, opts: 0 },
        options::NONE,
        1,
    );
    let regex = re(tree);
    let text = "aa b aaa";
    let starts: Vec<usize> = regex.find_iter(text).map(|m| m.start()).collect();
    for pair in starts.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    assert_eq!(starts.first(), Some(&0));
}

#[test]
fn capture_spans_are_substrings() {
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::capture(
                1,
                Node::Setloop { class: CharClass::word(), min: 1, max: MAX_REPEAT, opts: 0 },
            ),
            Node::one(' '),
            Node::capture(
                2,
                Node::Setloop { class: CharClass::digit(), min: 1, max: MAX_REPEAT, opts: 0 },
            ),
        ]),
        options::NONE,
        3,
    );
    let text = "item 42";
    let re_obj = re(tree);
    let m = re_obj.find(text).unwrap();
    for slot in 0..m.groups_len() as i32 {
        let g = m.group(slot).unwrap();
        assert!(g.end() <= text.len());
        assert_eq!(&text[g.range()], g.as_str());
    }
}

#[test]
fn case_insensitive_equals_folded_sensitive() {
    // the CI program matches the raw text iff the CS program matches the
    // folded text with folded literals
    let ci_tree = SyntaxTree::new(
        Node::multi("GrUß").with_opts(options::IGNORE_CASE),
        options::IGNORE_CASE,
        1,
    );
    let cs_tree = SyntaxTree::new(Node::multi("gruß"), options::NONE, 1);
    let ci = re(ci_tree);
    let cs = re(cs_tree);
    for text in ["GRUß sagen", "gruß sagen", "Gruss sagen"] {
        let folded: String = text.chars().map(rewind::unicode::to_lower).collect();
        assert_eq!(ci.is_match(text), cs.is_match(&folded), "text {:?}", text);
    }
}

#[test]
fn nested_empty_quantifier_terminates() {
    // (a*)* on "aaa"
    let tree = SyntaxTree::new(
        Node::greedy_loop(
            0,
            MAX_REPEAT,
            Node::capture(1, Node::Oneloop { ch: 'a', min: 0, max: MAX_REPEAT, opts: 0 }),
        ),
        options::NONE,
        2,
    );
    let re_obj = re(tree);
    let m = re_obj.find("aaa").unwrap();
    assert_eq!(span(&m), (0, 3));
}

#[test]
fn captures_inside_loops_record_every_iteration() {
    // (ab)+ on "ababab": slot 1 records three spans, reports the last
    let tree = SyntaxTree::new(
        Node::greedy_loop(1, MAX_REPEAT, Node::capture(1, Node::multi("ab"))),
        options::NONE,
        2,
    );
    let re_obj = re(tree);
    let m = re_obj.find("ababab").unwrap();
    let caps = m.group_captures(1);
    assert_eq!(caps.len(), 3);
    assert_eq!(caps[0].range(), 0..2);
    assert_eq!(caps[1].range(), 2..4);
    assert_eq!(caps[2].range(), 4..6);
    assert_eq!(m.group(1).unwrap().range(), 4..6);
}

#[test]
fn timeout_surfaces_as_runtime_limit() {
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::greedy_loop(
                1,
                MAX_REPEAT,
                Node::capture(1, Node::Oneloop { ch: 'a', min: 1, max: MAX_REPEAT, opts: 0 }),
            ),
            Node::one('b'),
        ]),
        options::NONE,
        2,
    );
    let regex = re(tree);
    let text = "a".repeat(64);
    let err = regex
        .find_range(&text, 0, text.len(), Some(Duration::from_millis(5)))
        .unwrap_err();
    assert!(err.is_timeout());
}

// === Direction ===

#[test]
fn right_to_left_finds_rightmost_first() {
    let tree = SyntaxTree::new(
        Node::multi("ab").with_opts(options::RIGHT_TO_LEFT),
        options::RIGHT_TO_LEFT,
        1,
    );
    let regex = re(tree);
    let m = regex.find("ab ab ab").unwrap();
    assert_eq!(span(&m), (6, 8));
    let m2 = m.next_match().unwrap().unwrap();
    assert_eq!(span(&m2), (3, 5));
    let m3 = m2.next_match().unwrap().unwrap();
    assert_eq!(span(&m3), (0, 2));
    assert!(m3.next_match().unwrap().is_none());
}

#[test]
fn right_to_left_on_empty_input() {
    let tree = SyntaxTree::new(
        Node::Oneloop { ch: 'a', min: 0, max: MAX_REPEAT, opts: options::RIGHT_TO_LEFT },
        options::RIGHT_TO_LEFT,
        1,
    );
    let re_obj = re(tree);
    let m = re_obj.find("").unwrap();
    assert_eq!(span(&m), (0, 0));
}

// === Unicode subjects ===

#[test]
fn multibyte_subjects_use_byte_offsets() {
    let tree = SyntaxTree::new(
        Node::concat(vec![
            Node::set(CharClass::word()),
            Node::one('界'),
        ]),
        options::NONE,
        1,
    );
    let re_obj = re(tree);
    let m = re_obj.find("x 世界 y").unwrap();
    assert_eq!(m.start(), 2);
    assert_eq!(m.as_str(), "世界");
}

#[test]
fn unmatched_backreference_fails_unless_ecma() {
    let build = |opts| {
        SyntaxTree::new(
            Node::concat(vec![
                Node::greedy_loop(0, 1, Node::capture(1, Node::one('x'))),
                Node::one('a'),
                Node::Ref { group: 1, opts: 0 },
            ]),
            opts,
            2,
        )
    };
    // default: unmatched group fails the reference
    assert!(re(build(options::NONE)).find("a").is_none());
    // ECMAScript: unmatched group matches trivially
    let re_obj = re(build(options::ECMASCRIPT));
    let m = re_obj.find("a").unwrap();
    assert_eq!(span(&m), (0, 1));
}
