// Copyright 2023 Remi Bernotavicius

use super::*;
use crate::catalog::{ingredients::create_ingredient, tags::create_tag};
use crate::database::models::User;
use crate::users::test_user;

struct Kitchen {
    conn: database::Connection,
    alice: User,
    bob: User,
    breakfast: Tag,
    lunch: Tag,
    eggs: Ingredient,
    salt: Ingredient,
}

impl Kitchen {
    fn new() -> Self {
        let mut conn = database::in_memory();
        let alice = test_user(&mut conn, "alice");
        let bob = test_user(&mut conn, "bob");
        let breakfast = create_tag(&mut conn, "Breakfast", "breakfast", "#ffa500").unwrap();
        let lunch = create_tag(&mut conn, "Lunch", "lunch", "#49b64e").unwrap();
        let eggs = create_ingredient(&mut conn, "Eggs", "pcs").unwrap();
        let salt = create_ingredient(&mut conn, "Salt", "g").unwrap();
        Self {
            conn,
            alice,
            bob,
            breakfast,
            lunch,
            eggs,
            salt,
        }
    }

    fn payload(&self, name: &str, amounts: &[(&Ingredient, i64)]) -> RecipePayload {
        RecipePayload {
            name: name.into(),
            text: "Mix and cook.".into(),
            cooking_time: 10,
            image: super::image::png_data_uri(),
            tags: vec![self.breakfast.id],
            ingredients: amounts
                .iter()
                .map(|(i, amount)| IngredientAmount {
                    id: i.id,
                    amount: *amount,
                })
                .collect(),
        }
    }

    fn create(&mut self, name: &str, amounts: &[(&Ingredient, i64)]) -> RecipeView {
        let payload = self.payload(name, amounts);
        create_recipe(&mut self.conn, Requester::User(self.alice.id), &payload).unwrap()
    }

    fn count_rows(&mut self, recipe_id: RecipeId) -> (i64, i64, i64, i64) {
        let conn = &mut self.conn;
        let ingredient_rows = recipe_ingredients::table
            .filter(recipe_ingredients::recipe_id.eq(recipe_id))
            .count()
            .get_result(conn)
            .unwrap();
        let tag_rows = recipe_tags::table
            .filter(recipe_tags::recipe_id.eq(recipe_id))
            .count()
            .get_result(conn)
            .unwrap();
        let favorite_rows = favorites::table
            .filter(favorites::recipe_id.eq(recipe_id))
            .count()
            .get_result(conn)
            .unwrap();
        let cart_rows = shopping_cart::table
            .filter(shopping_cart::recipe_id.eq(recipe_id))
            .count()
            .get_result(conn)
            .unwrap();
        (ingredient_rows, tag_rows, favorite_rows, cart_rows)
    }
}

#[test]
fn amount_bounds() {
    assert!(validate_amount(0).is_err());
    assert!(validate_amount(32001).is_err());
    assert_eq!(validate_amount(1).unwrap(), 1);
    assert_eq!(validate_amount(32000).unwrap(), 32000);

    assert!(validate_cooking_time(0).is_err());
    assert_eq!(validate_cooking_time(1).unwrap(), 1);
}

#[test]
fn create_rejects_out_of_range_amounts() {
    let mut k = Kitchen::new();
    let alice = Requester::User(k.alice.id);

    for amount in [0, 32001, -5] {
        let payload = k.payload("Omelette", &[(&k.eggs, amount)]);
        match create_recipe(&mut k.conn, alice, &payload) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "amount"),
            other => panic!("amount {amount} accepted: {other:?}"),
        }
    }
    for amount in [1, 32000] {
        let payload = k.payload(&format!("Omelette {amount}"), &[(&k.eggs, amount)]);
        let view = create_recipe(&mut k.conn, alice, &payload).unwrap();
        assert_eq!(view.ingredients[0].amount as i64, amount);
    }
}

#[test]
fn create_validates_payload() {
    let mut k = Kitchen::new();
    let alice = Requester::User(k.alice.id);
    let good = k.payload("Omelette", &[(&k.eggs, 3)]);

    let mut payload = good.clone();
    payload.cooking_time = 0;
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::Validation { .. })
    ));

    let mut payload = good.clone();
    payload.tags = vec![];
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::Validation { .. })
    ));

    let mut payload = good.clone();
    payload.ingredients.push(IngredientAmount {
        id: k.eggs.id,
        amount: 1,
    });
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::Validation { .. })
    ));

    let mut payload = good.clone();
    payload.tags = vec![TagId::from(999)];
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::NotFound(_))
    ));

    let mut payload = good.clone();
    payload.ingredients = vec![IngredientAmount {
        id: IngredientId::from(999),
        amount: 1,
    }];
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::NotFound(_))
    ));

    let mut payload = good.clone();
    payload.image = "not an image".into();
    assert!(matches!(
        create_recipe(&mut k.conn, alice, &payload),
        Err(Error::Validation { .. })
    ));

    assert!(matches!(
        create_recipe(&mut k.conn, Requester::Anonymous, &good),
        Err(Error::Unauthenticated)
    ));

    // nothing was half-written by any of the failures
    let count: i64 = recipes::table.count().get_result(&mut k.conn).unwrap();
    assert_eq!(count, 0);
}

#[test]
fn create_and_render() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let salt = k.salt.clone();
    let view = k.create("Omelette", &[(&salt, 2), (&eggs, 3)]);

    assert_eq!(view.name, "Omelette");
    assert_eq!(view.author.username, "alice");
    assert!(!view.author.is_subscribed);
    assert_eq!(view.tags.len(), 1);
    assert_eq!(view.tags[0].slug, "breakfast");
    assert_eq!(view.image, super::image::png_data_uri());
    assert_eq!(
        view.ingredients,
        vec![
            RecipeIngredientView {
                id: eggs.id,
                name: "Eggs".into(),
                measurement_unit: "pcs".into(),
                amount: 3,
            },
            RecipeIngredientView {
                id: salt.id,
                name: "Salt".into(),
                measurement_unit: "g".into(),
                amount: 2,
            },
        ]
    );
    assert!(!view.is_favorited);
    assert!(!view.is_in_shopping_cart);

    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["cooking_time"], 10);
    assert_eq!(json["ingredients"][0]["measurement_unit"], "pcs");
}

#[test]
fn update_replaces_ingredients_and_tags() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let salt = k.salt.clone();
    let view = k.create("Omelette", &[(&eggs, 2)]);

    let update = RecipeUpdate {
        name: Some("Salted omelette".into()),
        text: None,
        cooking_time: Some(15),
        image: None,
        tags: vec![k.lunch.id],
        ingredients: vec![IngredientAmount {
            id: salt.id,
            amount: 4,
        }],
    };
    let updated =
        update_recipe(&mut k.conn, Requester::User(k.alice.id), view.id, &update).unwrap();

    assert_eq!(updated.name, "Salted omelette");
    assert_eq!(updated.text, "Mix and cook.");
    assert_eq!(updated.cooking_time, 15);
    assert_eq!(updated.image, view.image);
    assert_eq!(updated.tags.len(), 1);
    assert_eq!(updated.tags[0].slug, "lunch");

    let rows: Vec<RecipeIngredient> = recipe_ingredients::table
        .filter(recipe_ingredients::recipe_id.eq(view.id))
        .select(RecipeIngredient::as_select())
        .load(&mut k.conn)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ingredient_id, salt.id);
    assert_eq!(rows[0].amount, 4);
}

#[test]
fn failed_update_changes_nothing() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let view = k.create("Omelette", &[(&eggs, 2)]);

    let update = RecipeUpdate {
        name: Some("Renamed".into()),
        text: None,
        cooking_time: None,
        image: None,
        tags: vec![k.lunch.id],
        ingredients: vec![IngredientAmount {
            id: IngredientId::from(999),
            amount: 4,
        }],
    };
    assert!(update_recipe(&mut k.conn, Requester::User(k.alice.id), view.id, &update).is_err());

    let unchanged = get_recipe(&mut k.conn, Requester::Anonymous, view.id).unwrap();
    assert_eq!(unchanged, view);
}

#[test]
fn only_the_author_may_change_a_recipe() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let view = k.create("Omelette", &[(&eggs, 2)]);

    let update = RecipeUpdate {
        name: None,
        text: None,
        cooking_time: None,
        image: None,
        tags: vec![k.lunch.id],
        ingredients: vec![IngredientAmount {
            id: eggs.id,
            amount: 1,
        }],
    };
    assert!(matches!(
        update_recipe(&mut k.conn, Requester::User(k.bob.id), view.id, &update),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        delete_recipe(&mut k.conn, Requester::User(k.bob.id), view.id),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        delete_recipe(&mut k.conn, Requester::Anonymous, view.id),
        Err(Error::Unauthenticated)
    ));
    assert!(matches!(
        delete_recipe(&mut k.conn, Requester::User(k.alice.id), RecipeId::from(999)),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn delete_cascades_but_keeps_catalog() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let salt = k.salt.clone();
    let view = k.create("Omelette", &[(&eggs, 2), (&salt, 1)]);

    relations::add_favorite(&mut k.conn, Requester::User(k.bob.id), view.id).unwrap();
    relations::add_to_cart(&mut k.conn, Requester::User(k.bob.id), view.id).unwrap();
    assert_eq!(k.count_rows(view.id), (2, 1, 1, 1));

    delete_recipe(&mut k.conn, Requester::User(k.alice.id), view.id).unwrap();
    assert_eq!(k.count_rows(view.id), (0, 0, 0, 0));
    assert!(matches!(
        get_recipe(&mut k.conn, Requester::Anonymous, view.id),
        Err(Error::NotFound(_))
    ));

    let catalog: i64 = ingredients::table.count().get_result(&mut k.conn).unwrap();
    assert_eq!(catalog, 2);
}

#[test]
fn deleting_the_author_deletes_their_recipes() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let view = k.create("Omelette", &[(&eggs, 2)]);
    relations::add_to_cart(&mut k.conn, Requester::User(k.bob.id), view.id).unwrap();

    users::delete_user(&mut k.conn, k.alice.id).unwrap();
    assert_eq!(k.count_rows(view.id), (0, 0, 0, 0));
    assert!(load_recipe(&mut k.conn, view.id).is_err());
}

#[test]
fn visibility_flags_follow_the_requester() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let view = k.create("Omelette", &[(&eggs, 2)]);
    let bob = Requester::User(k.bob.id);

    relations::add_favorite(&mut k.conn, bob, view.id).unwrap();

    let for_bob = get_recipe(&mut k.conn, bob, view.id).unwrap();
    assert!(for_bob.is_favorited);
    assert!(!for_bob.is_in_shopping_cart);

    let for_alice = get_recipe(&mut k.conn, Requester::User(k.alice.id), view.id).unwrap();
    assert!(!for_alice.is_favorited);

    let for_anonymous = get_recipe(&mut k.conn, Requester::Anonymous, view.id).unwrap();
    assert!(!for_anonymous.is_favorited);
    assert!(!for_anonymous.is_in_shopping_cart);
}

#[test]
fn list_filters() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let omelette = k.create("Omelette", &[(&eggs, 2)]);
    let boiled = k.create("Boiled eggs", &[(&eggs, 4)]);

    let mut payload = k.payload("Bob's lunch", &[(&eggs, 1)]);
    payload.tags = vec![k.lunch.id];
    let lunch = create_recipe(&mut k.conn, Requester::User(k.bob.id), &payload).unwrap();

    let bob = Requester::User(k.bob.id);
    relations::add_favorite(&mut k.conn, bob, omelette.id).unwrap();
    relations::add_to_cart(&mut k.conn, bob, boiled.id).unwrap();

    let ids = |found: Vec<RecipeView>| found.into_iter().map(|r| r.id).collect::<Vec<_>>();

    let all = list_recipes(&mut k.conn, bob, &RecipeFilter::default()).unwrap();
    assert_eq!(ids(all), [lunch.id, boiled.id, omelette.id]);

    let filter = RecipeFilter {
        author: Some(k.alice.id),
        ..Default::default()
    };
    let found = list_recipes(&mut k.conn, bob, &filter).unwrap();
    assert_eq!(ids(found), [boiled.id, omelette.id]);

    let filter = RecipeFilter {
        tags: vec!["lunch".into(), "dinner".into()],
        ..Default::default()
    };
    let found = list_recipes(&mut k.conn, bob, &filter).unwrap();
    assert_eq!(ids(found), [lunch.id]);

    let filter = RecipeFilter {
        is_favorited: true,
        ..Default::default()
    };
    let found = list_recipes(&mut k.conn, bob, &filter).unwrap();
    assert_eq!(ids(found), [omelette.id]);

    // ignored for anonymous requesters
    let found = list_recipes(&mut k.conn, Requester::Anonymous, &filter).unwrap();
    assert_eq!(found.len(), 3);

    let filter = RecipeFilter {
        is_in_shopping_cart: true,
        tags: vec!["breakfast".into()],
        ..Default::default()
    };
    let found = list_recipes(&mut k.conn, bob, &filter).unwrap();
    assert_eq!(ids(found), [boiled.id]);
}

#[test]
fn admin_listing_counts_favorites() {
    let mut k = Kitchen::new();
    let eggs = k.eggs.clone();
    let omelette = k.create("Omelette", &[(&eggs, 2)]);
    k.create("Boiled eggs", &[(&eggs, 4)]);

    relations::add_favorite(&mut k.conn, Requester::User(k.bob.id), omelette.id).unwrap();
    relations::add_favorite(&mut k.conn, Requester::User(k.alice.id), omelette.id).unwrap();

    let rows = admin_recipes(&mut k.conn, "").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].name, "Boiled eggs");
    assert_eq!(rows[0].in_favorites, 0);
    assert_eq!(
        rows[1],
        AdminRecipeRow {
            id: omelette.id,
            name: "Omelette".into(),
            author: "alice".into(),
            in_favorites: 2,
        }
    );

    let rows = admin_recipes(&mut k.conn, "OMEL").unwrap();
    assert_eq!(rows.len(), 1);
}
