//! Lightweight walkers over InnerTube renderer trees.
//!
//! InnerTube responses are deeply nested and change shape often. These
//! helpers only pull out the handful of fields the API exposes and skip
//! anything they do not recognize instead of failing.

use serde_json::{Map, Value, json};

const PAGE_TYPE_ARTIST: &str = "MUSIC_PAGE_TYPE_ARTIST";
const PAGE_TYPE_CHANNEL: &str = "MUSIC_PAGE_TYPE_USER_CHANNEL";
const PAGE_TYPE_ALBUM: &str = "MUSIC_PAGE_TYPE_ALBUM";

/// Follows `path` through objects and, for numeric segments, arrays.
pub fn nav<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => current.get(*segment),
    })
}

fn array<'a>(value: &'a Value, path: &[&str]) -> &'a [Value] {
    nav(value, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Text of a `runs` or `simpleText` node.
pub fn runs_text(value: &Value) -> Option<String> {
    if let Some(text) = value.get("simpleText").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let runs = value.get("runs")?.as_array()?;
    let text: String = runs
        .iter()
        .filter_map(|run| run.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    nav(value, path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_duration(text: &str) -> bool {
    !text.is_empty()
        && text.contains(':')
        && text.chars().all(|c| c.is_ascii_digit() || c == ':')
}

fn thumbnails(renderer: &Value) -> Value {
    let found = nav(
        renderer,
        &["thumbnail", "musicThumbnailRenderer", "thumbnail", "thumbnails"],
    )
    .or_else(|| {
        nav(
            renderer,
            &["thumbnailRenderer", "musicThumbnailRenderer", "thumbnail", "thumbnails"],
        )
    });
    found.cloned().unwrap_or_else(|| json!([]))
}

fn page_type(run: &Value) -> Option<&str> {
    nav(
        run,
        &[
            "navigationEndpoint",
            "browseEndpoint",
            "browseEndpointContextSupportedConfigs",
            "browseEndpointContextMusicConfig",
            "pageType",
        ],
    )
    .and_then(Value::as_str)
}

fn linked_run(run: &Value) -> Value {
    json!({
        "name": run.get("text").and_then(Value::as_str),
        "id": str_at(run, &["navigationEndpoint", "browseEndpoint", "browseId"]),
    })
}

/// Flattens a `musicResponsiveListItemRenderer` (search rows, library rows).
fn parse_list_item(renderer: &Value) -> Value {
    let column = |index: &str| {
        nav(
            renderer,
            &["flexColumns", index, "musicResponsiveListItemFlexColumnRenderer", "text"],
        )
    };
    let title = column("0").and_then(runs_text);
    let subtitle_runs = column("1")
        .and_then(|text| text.get("runs"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let artists: Vec<Value> = subtitle_runs
        .iter()
        .filter(|run| matches!(page_type(run), Some(PAGE_TYPE_ARTIST | PAGE_TYPE_CHANNEL)))
        .map(linked_run)
        .collect();
    let album = subtitle_runs
        .iter()
        .find(|run| page_type(run) == Some(PAGE_TYPE_ALBUM))
        .map(linked_run);
    let duration = subtitle_runs
        .iter()
        .rev()
        .filter_map(|run| run.get("text").and_then(Value::as_str))
        .find(|text| is_duration(text));

    let video_id = str_at(renderer, &["playlistItemData", "videoId"]).or_else(|| {
        str_at(
            renderer,
            &[
                "overlay",
                "musicItemThumbnailOverlayRenderer",
                "content",
                "musicPlayButtonRenderer",
                "playNavigationEndpoint",
                "watchEndpoint",
                "videoId",
            ],
        )
    });

    json!({
        "title": title,
        "videoId": video_id,
        "browseId": str_at(renderer, &["navigationEndpoint", "browseEndpoint", "browseId"]),
        "artists": artists,
        "album": album,
        "duration": duration,
        "thumbnails": thumbnails(renderer),
    })
}

/// Flattens a `musicTwoRowItemRenderer` (carousel cards, grid tiles).
fn parse_two_row_item(renderer: &Value) -> Value {
    let browse_id = str_at(renderer, &["navigationEndpoint", "browseEndpoint", "browseId"]);
    let playlist_id = str_at(renderer, &["navigationEndpoint", "watchEndpoint", "playlistId"])
        .or_else(|| {
            browse_id
                .as_deref()
                .and_then(|id| id.strip_prefix("VL"))
                .map(str::to_string)
        });

    let mut item = Map::new();
    item.insert("title".into(), json!(renderer.get("title").and_then(runs_text)));
    item.insert("subtitle".into(), json!(renderer.get("subtitle").and_then(runs_text)));
    item.insert("browseId".into(), json!(browse_id));
    item.insert(
        "videoId".into(),
        json!(str_at(renderer, &["navigationEndpoint", "watchEndpoint", "videoId"])),
    );
    if let Some(playlist_id) = playlist_id {
        item.insert("playlistId".into(), json!(playlist_id));
    }
    item.insert("thumbnails".into(), thumbnails(renderer));
    Value::Object(item)
}

fn parse_navigation_button(renderer: &Value) -> Value {
    json!({
        "title": renderer.get("buttonText").and_then(runs_text),
        "params": str_at(renderer, &["clickCommand", "browseEndpoint", "params"]),
    })
}

fn parse_item(item: &Value) -> Option<Value> {
    if let Some(renderer) = item.get("musicResponsiveListItemRenderer") {
        return Some(parse_list_item(renderer));
    }
    if let Some(renderer) = item.get("musicTwoRowItemRenderer") {
        return Some(parse_two_row_item(renderer));
    }
    item.get("musicNavigationButtonRenderer")
        .map(parse_navigation_button)
}

fn section_list(response: &Value) -> &[Value] {
    const TAB_CONTENT: [&str; 6] = [
        "tabs",
        "0",
        "tabRenderer",
        "content",
        "sectionListRenderer",
        "contents",
    ];
    for root in ["singleColumnBrowseResultsRenderer", "tabbedSearchResultsRenderer"] {
        let mut path = vec!["contents", root];
        path.extend(TAB_CONTENT);
        let sections = array(response, &path);
        if !sections.is_empty() {
            return sections;
        }
    }
    array(response, &["contents", "sectionListRenderer", "contents"])
}

/// Returns `(title, items)` for a shelf-like section, `None` for anything else.
fn parse_section(section: &Value) -> Option<(Option<String>, Vec<Value>)> {
    let (title, items) = if let Some(shelf) = section
        .get("musicCarouselShelfRenderer")
        .or_else(|| section.get("musicImmersiveCarouselShelfRenderer"))
    {
        (
            nav(shelf, &["header", "musicCarouselShelfBasicHeaderRenderer", "title"]),
            shelf.get("contents"),
        )
    } else if let Some(shelf) = section.get("musicShelfRenderer") {
        (shelf.get("title"), shelf.get("contents"))
    } else if let Some(grid) = section.get("gridRenderer") {
        (nav(grid, &["header", "gridHeaderRenderer", "title"]), grid.get("items"))
    } else {
        return None;
    };

    let items = items
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_item).collect())
        .unwrap_or_default();
    Some((title.and_then(runs_text), items))
}

/// Every shelf of a browse response as `{ "title", "contents" }`.
pub fn parse_shelves(response: &Value) -> Vec<Value> {
    section_list(response)
        .iter()
        .filter_map(parse_section)
        .map(|(title, contents)| json!({ "title": title, "contents": contents }))
        .collect()
}

/// Items of every shelf, flattened in order.
pub fn parse_shelf_items(response: &Value) -> Vec<Value> {
    section_list(response)
        .iter()
        .filter_map(parse_section)
        .flat_map(|(_, items)| items)
        .collect()
}

/// Song rows of a search response.
pub fn parse_search_results(response: &Value) -> Vec<Value> {
    section_list(response)
        .iter()
        .filter_map(|section| section.get("musicShelfRenderer"))
        .flat_map(|shelf| array(shelf, &["contents"]))
        .filter_map(|item| item.get("musicResponsiveListItemRenderer"))
        .map(parse_list_item)
        .collect()
}

pub fn parse_suggestions(response: &Value) -> Vec<String> {
    array(response, &["contents"])
        .iter()
        .flat_map(|section| array(section, &["searchSuggestionsSectionRenderer", "contents"]))
        .filter_map(|entry| nav(entry, &["searchSuggestionRenderer", "suggestion"]))
        .filter_map(runs_text)
        .collect()
}

/// Mood and genre buttons grouped by section title.
pub fn parse_mood_categories(response: &Value) -> Map<String, Value> {
    let mut categories = Map::new();
    for (title, items) in section_list(response).iter().filter_map(parse_section) {
        let Some(title) = title else {
            continue;
        };
        let buttons: Vec<Value> = items
            .into_iter()
            .filter(|item| item.get("params").is_some_and(|params| !params.is_null()))
            .collect();
        if !buttons.is_empty() {
            categories.insert(title, Value::Array(buttons));
        }
    }
    categories
}
