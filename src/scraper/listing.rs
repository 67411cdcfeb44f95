use anyhow::Result;
use scraper::{ElementRef, Html, Selector};

use crate::error::ArchiverError;
use crate::util::unabbr_number;

/// A thread prefix as it appears on a listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRef {
    pub name: String,
    /// CSS classes of the label span, used to look up prefix colors.
    pub classes: Vec<String>,
    /// Href of the label link, carrying the `prefix_id` query parameter.
    pub href: String,
}

/// One thread row parsed from a section listing page.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    /// Site-local thread id, from the `js-threadListItem-<id>` class token.
    pub site_id: u64,
    pub title: String,
    pub prefixes: Vec<PrefixRef>,
    pub author: String,
    /// Creation time as epoch seconds.
    pub created: i64,
    /// Thread URL relative to the forum base.
    pub relative_url: String,
    pub pinned: bool,
    pub reply_count: u64,
    pub view_count: u64,
}

struct Selectors {
    thread: Selector,
    title_cell: Selector,
    label_link: Selector,
    label_span: Selector,
    title_link: Selector,
    author: Selector,
    start_time: Selector,
    sticky: Selector,
    meta_pair: Selector,
    meta_label: Selector,
    meta_value: Selector,
}

impl Selectors {
    fn new() -> Self {
        // All selectors are literals; parse cannot fail.
        let sel = |s: &str| Selector::parse(s).expect("valid selector");
        Self {
            thread: sel(".structItem--thread"),
            title_cell: sel(".structItem-title"),
            label_link: sel("a.labelLink"),
            label_span: sel("span"),
            title_link: sel("a:not(.labelLink)"),
            author: sel(".structItem-minor .username"),
            start_time: sel(".structItem-startDate time[data-time]"),
            sticky: sel(".structItem-status--sticky"),
            meta_pair: sel(".structItem-cell--meta dl"),
            meta_label: sel("dt"),
            meta_value: sel("dd"),
        }
    }
}

/// Parse every thread row on a section listing page, in page order.
///
/// # Errors
///
/// Returns [`ArchiverError::Parse`] when a row is missing a required
/// structural element. A page that simply has no thread rows yields an
/// empty vec.
pub fn parse_listing(body: &str) -> Result<Vec<ListingEntry>> {
    let document = Html::parse_document(body);
    let selectors = Selectors::new();
    let mut entries = Vec::new();
    for row in document.select(&selectors.thread) {
        entries.push(parse_row(row, &selectors)?);
    }
    Ok(entries)
}

fn parse_row(row: ElementRef<'_>, selectors: &Selectors) -> Result<ListingEntry> {
    let site_id = row
        .value()
        .classes()
        .find_map(|class| class.strip_prefix("js-threadListItem-"))
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| ArchiverError::parse("listing row", "no js-threadListItem-<id> class"))?;

    let title_cell = row
        .select(&selectors.title_cell)
        .next()
        .ok_or_else(|| ArchiverError::parse("listing row", "no .structItem-title cell"))?;

    let mut prefixes = Vec::new();
    for label in title_cell.select(&selectors.label_link) {
        let href = label.value().attr("href").unwrap_or_default().to_string();
        let Some(span) = label.select(&selectors.label_span).next() else {
            continue;
        };
        let name = span.text().collect::<String>().trim().to_string();
        let classes = span.value().classes().map(ToString::to_string).collect();
        prefixes.push(PrefixRef { name, classes, href });
    }

    let title_link = title_cell
        .select(&selectors.title_link)
        .next()
        .ok_or_else(|| ArchiverError::parse("listing row", "no thread title link"))?;
    let title = title_link.text().collect::<String>().trim().to_string();

    let author = row
        .select(&selectors.author)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .ok_or_else(|| ArchiverError::parse("listing row", "no author"))?;

    let start_time = row
        .select(&selectors.start_time)
        .next()
        .ok_or_else(|| ArchiverError::parse("listing row", "no start date"))?;
    let created = start_time
        .value()
        .attr("data-time")
        .and_then(|t| t.parse::<i64>().ok())
        .ok_or_else(|| ArchiverError::parse("listing row", "unparseable data-time"))?;

    // The start-date <time> sits inside the canonical thread link.
    let relative_url = ElementRef::wrap(
        start_time
            .parent()
            .ok_or_else(|| ArchiverError::parse("listing row", "detached start date"))?,
    )
    .and_then(|parent| parent.value().attr("href").map(ToString::to_string))
    .ok_or_else(|| ArchiverError::parse("listing row", "start date not inside a link"))?;

    let pinned = row.select(&selectors.sticky).next().is_some();

    let (reply_count, view_count) = parse_meta_counts(row, selectors)?;

    Ok(ListingEntry {
        site_id,
        title,
        prefixes,
        author,
        created,
        relative_url,
        pinned,
        reply_count,
        view_count,
    })
}

/// Reply and view counts live in `<dl><dt>Replies</dt><dd>1.2k</dd></dl>`
/// pairs inside the meta cell.
fn parse_meta_counts(row: ElementRef<'_>, selectors: &Selectors) -> Result<(u64, u64)> {
    let mut replies = None;
    let mut views = None;
    for pair in row.select(&selectors.meta_pair) {
        let Some(dt) = pair.select(&selectors.meta_label).next() else {
            continue;
        };
        let Some(dd) = pair.select(&selectors.meta_value).next() else {
            continue;
        };
        let label = dt.text().collect::<String>();
        let value = dd.text().collect::<String>();
        match label.trim() {
            "Replies" => replies = Some(unabbr_number(value.trim())?),
            "Views" => views = Some(unabbr_number(value.trim())?),
            _ => {}
        }
    }
    match (replies, views) {
        (Some(r), Some(v)) => Ok((r, v)),
        _ => Err(ArchiverError::parse("listing row", "missing reply/view counts").into()),
    }
}
