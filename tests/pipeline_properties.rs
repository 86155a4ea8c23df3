//! Property tests over whole recipes and single stages

use proptest::prelude::*;
use wikiflow::wikitext::pipeline::recipes;
use wikiflow::wikitext::stages::{ListHandler, QuoteTransformer};
use wikiflow::wikitext::testing;
use wikiflow::wikitext::token::utils::count_eof;
use wikiflow::wikitext::token::{Kv, SourceRange, TagToken, Token};

fn full(source: &str) -> Vec<Token> {
    testing::run_recipe(recipes::TEXT_FULL, source, testing::mock_data_access())
}

fn list_item(bullets: &str, start: usize) -> Token {
    Token::StartTag(TagToken::with_attribs("listItem", vec![Kv::new("bullets", bullets)]))
        .at(start, start + bullets.len())
}

fn is_list_container(t: &Token) -> bool {
    matches!(t.name(), Some("ul") | Some("ol"))
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Resolved inline formatting: text and balanced `<i>`/`<b>` pairs.
fn resolved_line() -> impl Strategy<Value = Vec<Token>> {
    prop::collection::vec(
        prop_oneof![
            "[a-z ]{1,5}".prop_map(|s| vec![Token::text(s)]),
            "[a-z]{1,5}".prop_map(|s| vec![Token::start_tag("i"), Token::text(s), Token::end_tag("i")]),
            "[a-z]{1,5}".prop_map(|s| vec![Token::start_tag("b"), Token::text(s), Token::end_tag("b")]),
        ],
        0..6,
    )
    .prop_map(|parts| parts.into_iter().flatten().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn single_eof_survives_every_stage(src in "[a-z '*#:;=\n-]{0,60}") {
        let out = full(&src);
        prop_assert_eq!(count_eof(&out), 1);
        prop_assert!(out.last().map(Token::is_eof).unwrap_or(false));
    }

    #[test]
    fn source_ranges_stay_in_bounds(src in "[a-z '*#:;=\n-]{0,60}") {
        let out = full(&src);
        for token in &out {
            if let Some(r) = token.tsr() {
                prop_assert!(r.start <= r.end, "inverted range {:?} on {:?}", r, token);
                prop_assert!(r.end <= src.len(), "range {:?} past end on {:?}", r, token);
            }
        }
    }

    #[test]
    fn list_transitions_close_and_open_the_difference(
        b1 in "[*#]{1,4}",
        b2 in "[*#]{1,4}",
    ) {
        // <b1>a\n<b2>b
        let nl_at = b1.len() + 1;
        let tokens = vec![
            list_item(&b1, 0),
            Token::text("a"),
            Token::newline(Some(SourceRange::new(nl_at, nl_at + 1))),
            list_item(&b2, nl_at + 1),
            Token::text("b"),
            Token::EndOfInput,
        ];
        let out = testing::run_stage(ListHandler::new(), tokens);
        let a = out.iter().position(|t| t.as_text() == Some("a")).unwrap();
        let b = out.iter().position(|t| t.as_text() == Some("b")).unwrap();
        let p = common_prefix(&b1, &b2);

        let between = &out[a..b];
        let closed = between.iter().filter(|t| t.is_end_tag() && is_list_container(t)).count();
        let opened = between.iter().filter(|t| t.is_start_tag() && is_list_container(t)).count();
        prop_assert_eq!(closed, b1.len() - p);
        prop_assert_eq!(opened, b2.len() - p);

        let depth = out[..b].iter().fold(0i32, |d, t| match t {
            t if t.is_start_tag() && is_list_container(t) => d + 1,
            t if t.is_end_tag() && is_list_container(t) => d - 1,
            _ => d,
        });
        prop_assert_eq!(depth as usize, b2.len());
    }

    #[test]
    fn quote_resolution_is_idempotent(line in resolved_line()) {
        let mut input = line.clone();
        input.push(Token::EndOfInput);
        let out = testing::run_stage(QuoteTransformer::new(), input.clone());
        prop_assert_eq!(out, input);
    }

    #[test]
    fn single_indented_line_is_one_pre(word in "[a-z]{1,12}") {
        let src = format!(" {}", word);
        let out = full(&src);
        let pres = out.iter().filter(|t| t.is_start_tag() && t.name() == Some("pre")).count();
        prop_assert_eq!(pres, 1);
        prop_assert_eq!(out[0].tsr().map(|r| r.start), Some(0));
        let text: String = out.iter().filter_map(|t| t.as_text()).collect();
        prop_assert_eq!(text, word);
    }
}
