//! Ordering of out-of-band expansions

use rstest::rstest;
use std::rc::Rc;
use std::time::Duration;
use wikiflow::wikitext::config::PipelineOptions;
use wikiflow::wikitext::data_access::DirDataAccess;
use wikiflow::wikitext::pipeline::{recipes, PipelineExecutor};
use wikiflow::wikitext::testing;
use wikiflow::wikitext::token::Token;

fn texts(tokens: &[Token]) -> Vec<&str> {
    tokens.iter().filter_map(|t| t.as_text()).collect()
}

#[rstest]
#[case::slowest_first([30, 20, 10])]
#[case::fastest_first([10, 20, 30])]
#[case::middle_last([10, 30, 5])]
fn expansions_splice_in_source_order(#[case] delays: [u64; 3]) {
    let mut data = testing::mock_data_access();
    for (i, delay) in delays.iter().enumerate() {
        let title = format!("Template:T{}", i + 1);
        data = data
            .with_page(&title, &format!("<{}>", i + 1))
            .with_delay(&title, Duration::from_millis(*delay));
    }
    let out = testing::run_recipe(recipes::TEXT, "a{{t1}}b{{t2}}c{{t3}}d", data);
    assert_eq!(texts(&out), vec!["a", "<1>", "b", "<2>", "c", "<3>", "d"]);
    assert!(out.last().unwrap().is_eof());
}

#[test]
fn nested_expansions_keep_order() {
    let data = testing::mock_data_access()
        .with_page("Template:Outer", "[{{inner}}|{{inner}}]")
        .with_page("Template:Inner", "in")
        .with_delay("Template:Inner", Duration::from_millis(10));
    let out = testing::run_recipe(recipes::TEXT, "x{{outer}}y", data);
    let joined: String = texts(&out).concat();
    assert_eq!(joined, "x[in|in]y");
}

#[test]
fn executor_reads_templates_from_a_directory() {
    let dir = std::env::temp_dir().join(format!("wikiflow-templates-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("Shout.wiki"), "'''{{{1}}}'''").unwrap();

    let executor = PipelineExecutor::with_options(PipelineOptions::default(), Rc::new(DirDataAccess::new(&dir)));
    let out = executor.execute(recipes::TEXT_FULL, "{{shout|hey}}").unwrap();
    let names = testing::tag_names(&out);
    assert!(names.contains(&"b".to_string()), "{:?}", names);
    assert!(out.iter().any(|t| t.as_text() == Some("hey")));

    std::fs::remove_dir_all(&dir).ok();
}
