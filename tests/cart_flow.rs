mod common;

use common::{create_product, create_user, dec, setup};
use organic_biscuits_api::{
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        products::UpdateProductRequest,
    },
    error::AppError,
    services::{cart_service, product_service},
};

#[tokio::test]
async fn cart_merges_lines_and_enforces_stock() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = create_user(state, false).await?;
    let product_id = create_product(state, "Oat Biscuit", "4.99", 5).await?;

    let empty = cart_service::get_cart(state, &user).await?.data.unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.total, dec("0"));

    cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 2 }).await?;
    let cart = cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 1 })
        .await?
        .data
        .unwrap();

    // Adding the same product again grows the existing line.
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
    assert_eq!(cart.item_count, 3);
    assert_eq!(cart.total, dec("14.97"));

    let over = cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 3 }).await;
    assert!(matches!(over, Err(AppError::OutOfStock { available: 5 })));

    let item_id = cart.items[0].id;
    let updated = cart_service::update_cart_item(state, &user, item_id, UpdateCartItemRequest { quantity: 1 })
        .await?
        .data
        .unwrap();
    assert_eq!(updated.items[0].quantity, 1);
    assert_eq!(updated.total, dec("4.99"));

    let zero = cart_service::update_cart_item(state, &user, item_id, UpdateCartItemRequest { quantity: 0 }).await;
    assert!(matches!(zero, Err(AppError::BadRequest(_))));

    let removed = cart_service::remove_cart_item(state, &user, item_id).await?.data.unwrap();
    assert!(removed.items.is_empty());

    let missing = cart_service::remove_cart_item(state, &user, item_id).await;
    assert!(matches!(missing, Err(AppError::NotFound)));

    Ok(())
}

#[tokio::test]
async fn cart_items_are_private_to_their_owner() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let owner = create_user(state, false).await?;
    let other = create_user(state, false).await?;
    let product_id = create_product(state, "Ginger Snap", "3.99", 10).await?;

    let cart = cart_service::add_to_cart(state, &owner, AddToCartRequest { product_id, quantity: 1 })
        .await?
        .data
        .unwrap();
    let item_id = cart.items[0].id;

    // The other user has no cart row yet, and must not reach the owner's line either way.
    cart_service::add_to_cart(state, &other, AddToCartRequest { product_id, quantity: 1 }).await?;
    let result = cart_service::remove_cart_item(state, &other, item_id).await;
    assert!(matches!(result, Err(AppError::NotFound)));

    let cleared = cart_service::clear_cart(state, &owner).await?.data.unwrap();
    assert!(cleared.items.is_empty());
    let reloaded = cart_service::get_cart(state, &owner).await?.data.unwrap();
    assert!(reloaded.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn oversized_quantity_is_out_of_stock() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = create_user(state, false).await?;
    let product_id = create_product(state, "Malted Milk", "2.49", 5).await?;

    cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 1 }).await?;
    let huge = cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: i32::MAX }).await;
    assert!(matches!(huge, Err(AppError::OutOfStock { available: 5 })));

    let cart = cart_service::get_cart(state, &user).await?.data.unwrap();
    assert_eq!(cart.items[0].quantity, 1);

    Ok(())
}

#[tokio::test]
async fn cart_keeps_price_until_line_is_touched() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let admin = create_user(state, true).await?;
    let user = create_user(state, false).await?;
    let product_id = create_product(state, "Oat Biscuit", "4.99", 20).await?;
    let reprice = |price: &str| UpdateProductRequest {
        price: Some(dec(price)),
        ..Default::default()
    };

    cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 1 }).await?;
    product_service::update_product(state, &admin, product_id, reprice("6.00")).await?;

    let before = cart_service::get_cart(state, &user).await?.data.unwrap();
    assert_eq!(before.items[0].price, dec("4.99"));
    assert_eq!(before.total, dec("4.99"));

    // Re-adding refreshes the whole line to the current price.
    let readded = cart_service::add_to_cart(state, &user, AddToCartRequest { product_id, quantity: 1 })
        .await?
        .data
        .unwrap();
    assert_eq!(readded.items[0].price, dec("6.00"));
    assert_eq!(readded.items[0].quantity, 2);
    assert_eq!(readded.total, dec("12.00"));

    product_service::update_product(state, &admin, product_id, reprice("5.50")).await?;
    let stale = cart_service::get_cart(state, &user).await?.data.unwrap();
    assert_eq!(stale.total, dec("12.00"));

    let item_id = stale.items[0].id;
    let updated = cart_service::update_cart_item(state, &user, item_id, UpdateCartItemRequest { quantity: 3 })
        .await?
        .data
        .unwrap();
    assert_eq!(updated.items[0].price, dec("5.50"));
    assert_eq!(updated.total, dec("16.50"));

    Ok(())
}
