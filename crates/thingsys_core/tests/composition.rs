use std::collections::HashMap;
use thingsys_core::compose::{SequentialScopeIds, CHILDREN_SLOT, DEFAULT_MAX_RENDER_DEPTH};
use thingsys_core::db::open_db_in_memory;
use thingsys_core::{
    ComponentBundle, CompositionEngine, ContentStore, RenderError, SqliteThingRepository, Thing,
    ThingId,
};

fn engine() -> CompositionEngine<SequentialScopeIds> {
    CompositionEngine::with_scope_ids(SequentialScopeIds::new())
}

fn markup(html: &str) -> ComponentBundle {
    ComponentBundle {
        html: html.to_string(),
        ..ComponentBundle::default()
    }
}

fn thing(id: &str, html: &str) -> Thing {
    Thing::with_id(ThingId::from(id), id, "generic", markup(html))
}

fn source(things: &[&Thing]) -> HashMap<ThingId, Thing> {
    things
        .iter()
        .map(|thing| (thing.id.clone(), (*thing).clone()))
        .collect()
}

#[test]
fn renders_three_level_chain_from_store() {
    let store =
        ContentStore::open(SqliteThingRepository::new(open_db_in_memory().unwrap())).unwrap();
    let root = store.create("Root").unwrap().id;
    let middle = store.create("Middle").unwrap().id;
    let leaf = store.create("Leaf").unwrap().id;
    store
        .save(&root, markup(&format!("<section>{CHILDREN_SLOT}</section>")))
        .unwrap();
    store
        .save(&middle, markup(&format!("<ul>{CHILDREN_SLOT}</ul>")))
        .unwrap();
    store.save(&leaf, markup("<li>leaf</li>")).unwrap();
    store.add_child(&root, &middle, None).unwrap();
    store.add_child(&middle, &leaf, None).unwrap();
    let before = store.list();

    let html = engine().render(&store.get(&root).unwrap(), &store).unwrap();

    let expected = format!(
        "<div class=\"thing\" data-thing-id=\"{root}\" data-thing-scope=\"t-1\"><section>\
<div class=\"thing\" data-thing-id=\"{middle}\" data-thing-scope=\"t-2\"><ul>\
<div class=\"thing\" data-thing-id=\"{leaf}\" data-thing-scope=\"t-3\"><li>leaf</li></div>\n\
</ul></div>\n\
</section></div>\n"
    );
    assert_eq!(html, expected);
    assert_eq!(store.list(), before);
}

#[test]
fn children_are_not_rendered_without_slot_marker() {
    let mut parent = thing("parent", "<p>no slot</p>");
    let child = thing("child", "<span>hidden</span>");
    parent.children.push(child.id.clone());

    let html = engine().render(&parent, &source(&[&child])).unwrap();
    assert!(!html.contains("hidden"));
    assert!(html.contains("<p>no slot</p>"));
}

#[test]
fn missing_children_are_skipped() {
    let mut parent = thing("parent", &format!("<div>{CHILDREN_SLOT}</div>"));
    parent.children.push(ThingId::from("ghost"));

    let html = engine().render(&parent, &HashMap::new()).unwrap();
    assert_eq!(
        html,
        "<div class=\"thing\" data-thing-id=\"parent\" data-thing-scope=\"t-1\"><div></div></div>\n"
    );
}

#[test]
fn cycles_fail_the_whole_render() {
    let mut a = thing("a", CHILDREN_SLOT);
    let mut b = thing("b", CHILDREN_SLOT);
    a.children.push(b.id.clone());
    b.children.push(a.id.clone());

    let err = engine().render(&a, &source(&[&a, &b])).unwrap_err();
    assert_eq!(
        err,
        RenderError::CycleDetected {
            id: ThingId::from("a"),
            path: vec![ThingId::from("a"), ThingId::from("b"), ThingId::from("a")],
        }
    );
}

fn chain(len: usize) -> HashMap<ThingId, Thing> {
    (0..len)
        .map(|level| {
            let mut node = thing(&format!("n{level}"), CHILDREN_SLOT);
            if level + 1 < len {
                node.children.push(ThingId::from(format!("n{}", level + 1)));
            }
            (node.id.clone(), node)
        })
        .collect()
}

#[test]
fn deep_chain_fails_with_depth_error_instead_of_overflowing() {
    let things = chain(20_000);
    let root = things[&ThingId::from("n0")].clone();

    let err = engine().render(&root, &things).unwrap_err();
    assert_eq!(
        err,
        RenderError::DepthExceeded {
            id: ThingId::from(format!("n{DEFAULT_MAX_RENDER_DEPTH}")),
            depth: DEFAULT_MAX_RENDER_DEPTH + 1,
        }
    );
}

#[test]
fn chain_at_depth_limit_still_renders() {
    let things = chain(DEFAULT_MAX_RENDER_DEPTH);
    let root = things[&ThingId::from("n0")].clone();

    let html = engine().render(&root, &things).unwrap();
    assert_eq!(html.matches("class=\"thing\"").count(), DEFAULT_MAX_RENDER_DEPTH);
}

#[test]
fn custom_depth_limit_counts_page_root() {
    let mut system = thing("system-thing", CHILDREN_SLOT);
    let mut middle = thing("middle", CHILDREN_SLOT);
    let leaf = thing("leaf", "<p>leaf</p>");
    system.children.push(middle.id.clone());
    middle.children.push(leaf.id.clone());
    let things = source(&[&middle, &leaf]);

    let shallow = engine().with_max_depth(2);
    assert_eq!(
        shallow.render_page(&system, &things).unwrap_err(),
        RenderError::DepthExceeded {
            id: ThingId::from("leaf"),
            depth: 3,
        }
    );
    assert!(engine()
        .with_max_depth(3)
        .render_page(&system, &things)
        .unwrap()
        .contains("<p>leaf</p>"));
}

#[test]
fn siblings_render_by_order_then_list_position() {
    let mut parent = thing("parent", CHILDREN_SLOT);
    let mut late = thing("late", "late");
    late.order = 2;
    let mut first = thing("first", "first");
    first.order = 0;
    let mut tie = thing("tie", "tie");
    tie.order = 0;
    parent.children = vec![late.id.clone(), first.id.clone(), tie.id.clone()];

    let html = engine()
        .render(&parent, &source(&[&late, &first, &tie]))
        .unwrap();
    let position = |needle: &str| html.find(&format!(">{needle}<")).unwrap();
    assert!(position("first") < position("tie"));
    assert!(position("tie") < position("late"));
}

#[test]
fn style_fragment_is_scoped_per_instance() {
    let mut card = thing("card", "<h2 class=\"title\">Hi</h2>");
    card.components.css = ".title { color: red; }".to_string();

    let engine = engine();
    let first = engine.render(&card, &HashMap::new()).unwrap();
    let second = engine.render(&card, &HashMap::new()).unwrap();

    assert!(first.starts_with(
        "<style data-thing-scope=\"t-1\">\n[data-thing-scope=\"t-1\"] .title { color: red; }\n</style>\n"
    ));
    assert!(second.contains("[data-thing-scope=\"t-2\"] .title"));
    assert!(!second.contains("t-1"));
}

#[test]
fn client_script_is_wrapped_after_markup() {
    let mut widget = thing("widget", "<button>go</button>");
    widget.components.client_js = "document.title = 'x';".to_string();

    let html = engine().render(&widget, &HashMap::new()).unwrap();
    let markup_at = html.find("<button>go</button>").unwrap();
    let script_at = html.find("<script>").unwrap();
    assert!(markup_at < script_at);
    assert!(html.contains("try{\ndocument.title = 'x';\n}catch(e)"));
    assert!(html.contains("\"widget\""));
}

#[test]
fn page_substitutes_style_id_and_children_without_wrapping() {
    let mut system = Thing::with_id(
        ThingId::system(),
        "Thing System",
        "system",
        ComponentBundle {
            html: format!(
                "<html><head><style></style></head><body data-id=\"${{SYSTEM_THING_ID}}\">{CHILDREN_SLOT}</body></html>"
            ),
            css: "body { margin: 0; }".to_string(),
            ..ComponentBundle::default()
        },
    );
    let child = thing("child", "<p>child</p>");
    system.children.push(child.id.clone());

    let page = engine().render_page(&system, &source(&[&child])).unwrap();

    assert!(page.starts_with("<html><head><style>body { margin: 0; }</style></head>"));
    assert!(page.contains("data-id=\"system-thing\""));
    assert!(page.contains(
        "<div class=\"thing\" data-thing-id=\"child\" data-thing-scope=\"t-1\"><p>child</p></div>"
    ));
    assert!(!page.contains("data-thing-id=\"system-thing\""));
    assert!(!page.contains(CHILDREN_SLOT));
}

#[test]
fn preview_wraps_rendered_thing_in_document() {
    let card = Thing::with_id(
        ThingId::from("card"),
        "Tom & Jerry",
        "generic",
        markup("<p>card</p>"),
    );

    let page = engine().render_preview(&card, &HashMap::new()).unwrap();
    assert!(page.starts_with("<!DOCTYPE html>"));
    assert!(page.contains("<title>Tom &amp; Jerry</title>"));
    assert!(page.contains("<p>card</p>"));
}
