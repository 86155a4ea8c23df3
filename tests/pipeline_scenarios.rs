//! End-to-end scenarios through the built-in recipes

use insta::assert_snapshot;
use wikiflow::wikitext::config::PipelineOptions;
use wikiflow::wikitext::pipeline::recipes;
use wikiflow::wikitext::testing;
use wikiflow::wikitext::token::{SourceRange, Token};

fn full(source: &str) -> Vec<Token> {
    testing::run_recipe(recipes::TEXT_FULL, source, testing::mock_data_access())
}

fn texts(tokens: &[Token]) -> String {
    tokens.iter().filter_map(|t| t.as_text()).collect()
}

#[test]
fn indented_line_becomes_pre() {
    let out = full(" hello");
    assert_eq!(testing::tag_names(&out), vec!["pre", "/pre"]);
    assert_eq!(texts(&out), "hello");
    assert_eq!(out[0].tsr().map(|r| r.start), Some(0));
    assert!(out.last().unwrap().is_eof());
}

#[test]
fn deeper_list_opens_every_missing_level() {
    let out = full("**a\n****b");
    let b = out.iter().position(|t| t.as_text() == Some("b")).unwrap();
    let starts: Vec<&Token> = out[..b].iter().filter(|t| t.is_start_tag()).collect();
    let names: Vec<&str> = starts.iter().filter_map(|t| t.name()).collect();
    assert_eq!(names, vec!["ul", "li", "ul", "li", "ul", "li", "ul", "li"]);
    // The third level's item absorbs the shared prefix plus one new bullet.
    assert_eq!(starts[5].tsr(), Some(SourceRange::new(4, 7)));
    assert_eq!(starts[7].tsr(), Some(SourceRange::new(7, 8)));

    let opened = out.iter().filter(|t| t.is_start_tag() && t.name() == Some("ul")).count();
    let closed = out.iter().filter(|t| t.is_end_tag() && t.name() == Some("ul")).count();
    assert_eq!((opened, closed), (4, 4));
}

#[test]
fn five_quotes_on_both_sides() {
    let out = full("''''' x '''''");
    let names: Vec<String> = testing::tag_names(&out)
        .into_iter()
        .filter(|n| n != "p" && n != "/p")
        .collect();
    assert_eq!(names, vec!["i", "b", "/b", "/i"]);
    assert_eq!(texts(&out), " x ");
    assert!(out.iter().all(|t| t.name() != Some("mw-quote")));
}

#[test]
fn templated_table_attribute_hoists_start_marker() {
    let data = testing::mock_data_access().with_page("Template:Attr", "class=\"a\"\n|b");
    let out = testing::run_recipe(recipes::TEXT, "{| {{attr}}\n|}", data);

    assert_eq!(
        out[0].attribute_string("typeof").as_deref(),
        Some("mw:Transclusion")
    );
    assert_eq!(out[0].tsr().map(|r| r.start), Some(0));

    let table = out
        .iter()
        .position(|t| t.is_start_tag() && t.name() == Some("table"))
        .unwrap();
    assert_eq!(table, 1);
    assert_eq!(out[table].attribute_string("class").as_deref(), Some("a"));
    assert!(out[table]
        .attribute_string("typeof")
        .unwrap_or_default()
        .contains("mw:ExpandedAttrs"));

    // Content after the newline follows the table start as a sibling.
    let sibling = out.iter().position(|t| t.as_text() == Some("|b")).unwrap();
    assert!(sibling > table);
    let end = out
        .iter()
        .position(|t| t.attribute_string("typeof").as_deref() == Some("mw:Transclusion/End"))
        .unwrap();
    assert!(end > sibling);
}

#[test]
fn paragraphs_and_formatting() {
    let out = full("''a''\n\nb");
    assert_snapshot!(testing::compact(&out), @r"
    <p><i>a</i></p>

    <p>b</p><EOF>
    ");
}

#[test]
fn template_inside_list_item() {
    let data = testing::mock_data_access().with_page("Template:Name", "World");
    let out = testing::run_recipe(recipes::TEXT_FULL, "* Hello {{name}}", data);
    assert_eq!(texts(&out), " Hello World");
    let names = testing::tag_names(&out);
    assert_eq!(names.first().map(String::as_str), Some("ul"));
    assert!(names.contains(&"meta".to_string()));
}

#[test]
fn template_arguments_and_parser_functions() {
    let data = testing::mock_data_access().with_page(
        "Template:Greeting",
        "{{#if: {{{name|}}} | Hi {{{name}}} | Hello stranger}}",
    );
    let out = testing::run_recipe(recipes::TEXT, "{{greeting|name=Ann}}", data.clone());
    assert_eq!(texts(&out), "Hi Ann");
    let out = testing::run_recipe(recipes::TEXT, "{{greeting}}", data);
    assert_eq!(texts(&out), "Hello stranger");
}

#[test]
fn unexpanded_mode_keeps_templates_literal_or_tokens() {
    let options = PipelineOptions {
        expand_templates: false,
        ..PipelineOptions::default()
    };
    let data = testing::mock_data_access().with_page("Template:T", "x");
    let out = testing::run_recipe_with(recipes::TEXT, "{{t}}", options, data);
    // Without wrapping there are no markers, only the body.
    assert_eq!(texts(&out), "x");
    assert!(testing::tag_names(&out).is_empty());
}

#[test]
fn nowiki_body_is_not_parsed() {
    let out = full("<nowiki>''x''</nowiki>");
    assert!(out.iter().all(|t| t.name() != Some("i")));
    assert!(out.iter().any(|t| t.as_text() == Some("''x''")));
}
