use scraper::{Html, Selector};

/// Prefix label colors scraped from the forum's notice stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrefixColors {
    pub text_color: Option<String>,
    pub bg_color: Option<String>,
}

/// Stylesheet bundles are versioned query strings; the one carrying the
/// label rules always starts with this prefix.
const NOTICES_CSS_PREFIX: &str = "/css.php?css=public%3Anotices.less";

/// Find the href of the notice stylesheet on any forum page.
#[must_use]
pub fn stylesheet_href(page: &str) -> Option<String> {
    let document = Html::parse_document(page);
    let selector = Selector::parse(r#"link[rel="stylesheet"]"#).expect("valid selector");
    document
        .select(&selector)
        .filter_map(|link| link.value().attr("href"))
        .find(|href| href.starts_with(NOTICES_CSS_PREFIX))
        .map(ToString::to_string)
}

/// Pull the site-side prefix id out of a label link href
/// (`...?prefix_id[0]=7`).
#[must_use]
pub fn parse_prefix_id(href: &str) -> Option<u64> {
    let query = href.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "prefix_id[0]" || *key == "prefix_id%5B0%5D")
        .and_then(|(_, value)| value.parse().ok())
}

/// Look up a label's colors in the stylesheet by its class list.
///
/// The rule of interest has a selector made of the label's classes joined
/// as `.class1.class2`. Returns defaults when no rule matches.
#[must_use]
pub fn parse_prefix_colors(css: &str, classes: &[String]) -> PrefixColors {
    let selector: String = classes.iter().map(|class| format!(".{class}")).collect();
    if selector.is_empty() {
        return PrefixColors::default();
    }

    for rule in css.split('}') {
        let Some((selectors, declarations)) = rule.split_once('{') else {
            continue;
        };
        if !selectors
            .split(',')
            .any(|candidate| candidate.trim() == selector)
        {
            continue;
        }
        let mut colors = PrefixColors::default();
        for declaration in declarations.split(';') {
            let Some((property, value)) = declaration.split_once(':') else {
                continue;
            };
            match property.trim() {
                "color" => colors.text_color = Some(value.trim().to_string()),
                "background-color" => colors.bg_color = Some(value.trim().to_string()),
                _ => {}
            }
        }
        return colors;
    }
    PrefixColors::default()
}
