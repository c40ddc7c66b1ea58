use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use scrapbook_core::contents::{ExtractConfig, extract_readable, prepare_html, text_content};
use scrapbook_core::{Document, Dom, parse_search};

/// A page with `n` paragraphs of content surrounded by the usual noise.
fn page(n: usize) -> String {
    let mut html = String::from(
        r#"<!DOCTYPE html><html><head><title>Bench</title><script>var x = 1;</script></head><body>
<header><nav><a href="/">Home</a> <a href="/about">About</a></nav></header>
<aside class="sidebar"><ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li></ul></aside>
<div class="content"><h1>Bench</h1>"#,
    );
    for i in 0..n {
        html.push_str(&format!(
            "<p>Paragraph {i} has enough words to be scored, with commas, clauses, \
             and an <a href=\"/link/{i}\">occasional link</a> to keep the density honest.</p>"
        ));
        if i % 10 == 0 {
            html.push_str(&format!("<figure><img src=\"/img/{i}.png\" srcset=\"/img/{i}.png 1x\"></figure>"));
        }
    }
    html.push_str("</div><footer class=\"footer\">Copyright</footer></body></html>");
    html
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for n in [10, 100, 1000] {
        let html = page(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &html, |b, html| {
            b.iter(|| Document::parse(black_box(html)))
        });
    }
    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    let html = page(100);
    c.bench_function("prepare", |b| b.iter(|| prepare_html(black_box(&html))));
}

fn bench_readable(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_readable");
    let config = ExtractConfig::default();
    for n in [10, 100] {
        let dom = Dom::new(page(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &dom, |b, dom| {
            b.iter(|| extract_readable(black_box(dom), &config))
        });
    }
    group.finish();
}

fn bench_text(c: &mut Criterion) {
    let html = page(100);
    c.bench_function("text_content", |b| b.iter(|| text_content(black_box(&html))));
}

fn bench_search(c: &mut Criterion) {
    let query = r#"title:"long read" author:doe site:example.net cats dogs "quoted \"term\"""#;
    c.bench_function("parse_search", |b| b.iter(|| parse_search(black_box(query))));
}

criterion_group!(benches, bench_parse, bench_prepare, bench_readable, bench_text, bench_search);
criterion_main!(benches);
