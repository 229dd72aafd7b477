// Copyright 2023 Remi Bernotavicius

use crate::database;
use crate::database::models::{NewTag, Tag, TagId};
use crate::error::{ConflictExt as _, Error, Result};
use diesel::prelude::OptionalExtension as _;
use diesel::BoolExpressionMethods as _;
use diesel::ExpressionMethods as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;
use serde::Serialize;
use strum::EnumIter;

const MAX_NAME_LENGTH: usize = 100;
const MAX_SLUG_LENGTH: usize = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NamedColor {
    Black,
    White,
    Gray,
    Silver,
    Red,
    DarkRed,
    Maroon,
    Crimson,
    Tomato,
    Coral,
    Orange,
    DarkOrange,
    Gold,
    Yellow,
    Khaki,
    Olive,
    Lime,
    Green,
    DarkGreen,
    ForestGreen,
    SeaGreen,
    Teal,
    Aqua,
    Turquoise,
    SkyBlue,
    SteelBlue,
    Blue,
    Navy,
    Indigo,
    Purple,
    Violet,
    Fuchsia,
    HotPink,
    Pink,
    Brown,
    Chocolate,
    Tan,
    Beige,
}

impl NamedColor {
    pub fn hex(&self) -> &'static str {
        match self {
            Self::Black => "#000000",
            Self::White => "#ffffff",
            Self::Gray => "#808080",
            Self::Silver => "#c0c0c0",
            Self::Red => "#ff0000",
            Self::DarkRed => "#8b0000",
            Self::Maroon => "#800000",
            Self::Crimson => "#dc143c",
            Self::Tomato => "#ff6347",
            Self::Coral => "#ff7f50",
            Self::Orange => "#ffa500",
            Self::DarkOrange => "#ff8c00",
            Self::Gold => "#ffd700",
            Self::Yellow => "#ffff00",
            Self::Khaki => "#f0e68c",
            Self::Olive => "#808000",
            Self::Lime => "#00ff00",
            Self::Green => "#008000",
            Self::DarkGreen => "#006400",
            Self::ForestGreen => "#228b22",
            Self::SeaGreen => "#2e8b57",
            Self::Teal => "#008080",
            Self::Aqua => "#00ffff",
            Self::Turquoise => "#40e0d0",
            Self::SkyBlue => "#87ceeb",
            Self::SteelBlue => "#4682b4",
            Self::Blue => "#0000ff",
            Self::Navy => "#000080",
            Self::Indigo => "#4b0082",
            Self::Purple => "#800080",
            Self::Violet => "#ee82ee",
            Self::Fuchsia => "#ff00ff",
            Self::HotPink => "#ff69b4",
            Self::Pink => "#ffc0cb",
            Self::Brown => "#a52a2a",
            Self::Chocolate => "#d2691e",
            Self::Tan => "#d2b48c",
            Self::Beige => "#f5f5dc",
        }
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }
}

/// The CSS name of an exact hex color, if it has one.
pub fn color_name(hex: &str) -> Option<NamedColor> {
    let hex = hex.to_ascii_lowercase();
    NamedColor::iter().find(|c| c.hex() == hex)
}

fn normalize_color(color: &str) -> Result<String> {
    let digits = color.strip_prefix('#').unwrap_or("");
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation("color", "Color must be a hex code like #49b64e."));
    }
    Ok(format!("#{}", digits.to_ascii_lowercase()))
}

fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty()
        || slug.len() > MAX_SLUG_LENGTH
        || !slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::validation(
            "slug",
            "Enter a valid slug of letters, numbers, underscores or hyphens.",
        ));
    }
    Ok(())
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TagView {
    pub id: TagId,
    pub name: String,
    pub color: String,
    pub color_name: Option<String>,
    pub slug: String,
}

impl From<Tag> for TagView {
    fn from(tag: Tag) -> Self {
        Self {
            color_name: color_name(&tag.color).map(|c| c.to_string()),
            id: tag.id,
            name: tag.name,
            color: tag.color,
            slug: tag.slug,
        }
    }
}

pub fn create_tag(
    conn: &mut database::Connection,
    new_name: &str,
    new_slug: &str,
    new_color: &str,
) -> Result<Tag> {
    use database::schema::tags::dsl::*;

    let new_name = new_name.trim();
    if new_name.is_empty() || new_name.chars().count() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            "name",
            format!("Must be between 1 and {MAX_NAME_LENGTH} characters."),
        ));
    }
    validate_slug(new_slug)?;
    let new_color = normalize_color(new_color)?;

    let duplicate_message = "A tag with this name, slug or color already exists.";
    let existing: i64 = tags
        .filter(
            name.eq(new_name)
                .or(slug.eq(new_slug))
                .or(color.eq(new_color.as_str())),
        )
        .count()
        .get_result(conn)?;
    if existing > 0 {
        return Err(Error::Conflict(duplicate_message.into()));
    }

    let tag = diesel::insert_into(tags)
        .values(NewTag {
            name: new_name,
            slug: new_slug,
            color: &new_color,
        })
        .returning(Tag::as_returning())
        .get_result(conn)
        .or_conflict(duplicate_message)?;

    log::info!("added tag {} ({})", tag.slug, tag.id);
    Ok(tag)
}

pub fn get_tag(conn: &mut database::Connection, tag_id: TagId) -> Result<Tag> {
    use database::schema::tags::dsl::*;

    tags.select(Tag::as_select())
        .filter(id.eq(tag_id))
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("No tag with id {tag_id}.")))
}

pub fn list_tags(conn: &mut database::Connection) -> Result<Vec<Tag>> {
    use database::schema::tags::dsl::*;

    Ok(tags.select(Tag::as_select()).order(name).load(conn)?)
}

pub fn delete_tag(conn: &mut database::Connection, delete_id: TagId) -> Result<()> {
    use database::schema::tags::dsl::*;

    let deleted = diesel::delete(tags.filter(id.eq(delete_id))).execute(conn)?;
    if deleted == 0 {
        return Err(Error::NotFound(format!("No tag with id {delete_id}.")));
    }
    log::info!("deleted tag {delete_id}");
    Ok(())
}

#[test]
fn color_names() {
    assert_eq!(color_name("#FF0000"), Some(NamedColor::Red));
    assert_eq!(color_name("#228b22"), Some(NamedColor::ForestGreen));
    assert_eq!(NamedColor::ForestGreen.to_string(), "forestgreen");
    assert_eq!(color_name("#123456"), None);
}

#[test]
fn colors_are_unique() {
    let mut seen = std::collections::HashSet::new();
    for c in NamedColor::iter() {
        assert!(seen.insert(c.hex()), "{c} repeats {}", c.hex());
    }
}

#[test]
fn create_and_list() {
    let mut conn = database::in_memory();
    create_tag(&mut conn, "Lunch", "lunch", "#FFA500").unwrap();
    create_tag(&mut conn, "Breakfast", "breakfast", "#49b64e").unwrap();

    let all: Vec<TagView> = list_tags(&mut conn)
        .unwrap()
        .into_iter()
        .map(TagView::from)
        .collect();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].slug, "breakfast");
    assert_eq!(all[0].color_name, None);
    assert_eq!(all[1].color, "#ffa500");
    assert_eq!(all[1].color_name.as_deref(), Some("orange"));
}

#[test]
fn tag_fields_are_unique_and_validated() {
    let mut conn = database::in_memory();
    let lunch = create_tag(&mut conn, "Lunch", "lunch", "#ffa500").unwrap();

    for (n, s, c) in [
        ("Lunch", "lunch-2", "#000001"),
        ("Dinner", "lunch", "#000002"),
        ("Dinner", "dinner", "#FFA500"),
    ] {
        assert!(matches!(
            create_tag(&mut conn, n, s, c),
            Err(Error::Conflict(_))
        ));
    }
    for (n, s, c) in [
        ("Dinner", "din ner", "#000003"),
        ("Dinner", "dinner", "orange"),
        ("Dinner", "dinner", "#12345"),
        ("", "dinner", "#000003"),
    ] {
        assert!(matches!(
            create_tag(&mut conn, n, s, c),
            Err(Error::Validation { .. })
        ));
    }

    assert_eq!(get_tag(&mut conn, lunch.id).unwrap(), lunch);
    delete_tag(&mut conn, lunch.id).unwrap();
    assert!(list_tags(&mut conn).unwrap().is_empty());
}
