mod common;

use common::{create_user, dec, setup};
use organic_biscuits_api::{
    dto::{
        addresses::CreateAddressRequest,
        categories::CreateCategoryRequest,
        products::{CreateProductRequest, CreateReviewRequest, ProductList},
    },
    error::AppError,
    response::ApiResponse,
    routes::params::{Pagination, ProductQuery, ProductSort, ReportQuery},
    services::{address_service, admin_service, category_service, product_service, review_service},
};
use uuid::Uuid;

fn product_request(name: &str, category: &str) -> CreateProductRequest {
    CreateProductRequest {
        name: name.to_string(),
        description: Some("Stone-ground spelt".into()),
        price: dec("5.49"),
        original_price: None,
        stock: 25,
        categories: vec![category.to_string()],
        image: None,
        images: Vec::new(),
        is_featured: false,
        ingredients: Some("spelt, butter, sugar".into()),
        nutritional_info: None,
        weight: Some("200g".into()),
    }
}

#[tokio::test]
async fn admin_catalog_management_and_public_browsing() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let admin = create_user(state, true).await?;
    let customer = create_user(state, false).await?;
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();

    let category_name = format!("Spelt {tag}");
    let category = category_service::create_category(
        state,
        &admin,
        CreateCategoryRequest {
            name: category_name.clone(),
            description: None,
            image: None,
            is_active: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(category.slug, format!("spelt-{tag}"));
    assert!(category.is_active);

    let forbidden = category_service::create_category(
        state,
        &customer,
        CreateCategoryRequest {
            name: format!("Nope {tag}"),
            description: None,
            image: None,
            is_active: None,
        },
    )
    .await;
    assert!(matches!(forbidden, Err(AppError::Forbidden)));

    let product_name = format!("Spelt Thins {tag}");
    let product = product_service::create_product(state, &admin, product_request(&product_name, &category_name))
        .await?
        .data
        .unwrap();
    assert_eq!(product.slug, format!("spelt-thins-{tag}"));
    assert_eq!(product.categories, vec![category.slug.clone()]);

    // Same name means same slug.
    let duplicate =
        product_service::create_product(state, &admin, product_request(&product_name, &category_name)).await;
    assert!(matches!(duplicate, Err(AppError::Conflict(_))));

    let by_slug = product_service::get_product(state, &product.slug).await?.data.unwrap();
    assert_eq!(by_slug.id, product.id);
    let by_id = product_service::get_product(state, &product.id.to_string()).await?.data.unwrap();
    assert_eq!(by_id.slug, product.slug);

    let filtered = product_service::list_products(
        state,
        ProductQuery {
            category: Some(category.slug.clone()),
            ..Default::default()
        },
    )
    .await?;
    let items = filtered.data.unwrap().items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, product.id);
    assert_eq!(filtered.meta.unwrap().total, Some(1));

    let searched = product_service::list_products(
        state,
        ProductQuery {
            search: Some(format!("thins {tag}")),
            ..Default::default()
        },
    )
    .await?
    .data
    .unwrap();
    assert!(searched.items.iter().any(|p| p.id == product.id));

    let priced_out = product_service::list_products(
        state,
        ProductQuery {
            category: Some(category.slug.clone()),
            max_price: Some(dec("5.00")),
            ..Default::default()
        },
    )
    .await?
    .data
    .unwrap();
    assert!(priced_out.items.is_empty());

    let listed = category_service::list_categories(state, true).await?.data.unwrap();
    let counted = listed.items.iter().find(|c| c.id == category.id).unwrap();
    assert_eq!(counted.product_count, 1);

    product_service::delete_product(state, &admin, product.id).await?;
    let gone = product_service::get_product(state, &product.slug).await;
    assert!(matches!(gone, Err(AppError::NotFound)));

    category_service::delete_category(state, &admin, category.id).await?;

    Ok(())
}

#[tokio::test]
async fn reviews_update_product_rating() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let reviewer = create_user(state, false).await?;
    let product_id = common::create_product(state, "Shortbread", "3.25", 10).await?;
    let key = product_id.to_string();

    let out_of_range = review_service::create_review(
        state,
        &reviewer,
        &key,
        CreateReviewRequest {
            rating: 6,
            comment: None,
        },
    )
    .await;
    assert!(matches!(out_of_range, Err(AppError::Validation(_))));

    for rating in [5, 4] {
        let review = review_service::create_review(
            state,
            &reviewer,
            &key,
            CreateReviewRequest {
                rating,
                comment: Some("Crumbly in the best way".into()),
            },
        )
        .await?
        .data
        .unwrap();
        assert!(!review.is_verified);
        assert_eq!(review.user_name, reviewer.name);
    }

    let reviews = review_service::list_reviews(state, &key, Pagination::default())
        .await?
        .data
        .unwrap();
    assert_eq!(reviews.items.len(), 2);

    let product = product_service::get_product(state, &key).await?.data.unwrap();
    assert_eq!(product.review_count, 2);
    assert_eq!(product.rating, 4.5);

    Ok(())
}

fn ids_of(response: &ApiResponse<ProductList>) -> Vec<Uuid> {
    response
        .data
        .as_ref()
        .map(|list| list.items.iter().map(|p| p.id).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn product_listing_sorts_and_pages() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let admin = create_user(state, true).await?;
    let reviewer = create_user(state, false).await?;
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    let category = format!("Sort {tag}");

    // Created in this order, so "newest" is the reverse.
    let mut ids = Vec::new();
    for (name, price, featured) in [
        ("Almond", "4.00", false),
        ("Bran", "2.00", true),
        ("Cocoa", "6.00", false),
        ("Date", "3.00", false),
    ] {
        let product = product_service::create_product(
            state,
            &admin,
            CreateProductRequest {
                price: dec(price),
                is_featured: featured,
                ..product_request(&format!("{name} {tag}"), &category)
            },
        )
        .await?
        .data
        .unwrap();
        ids.push(product.id);
    }
    let [almond, bran, cocoa, date] = [ids[0], ids[1], ids[2], ids[3]];

    for (product, rating) in [(cocoa, 5), (almond, 3)] {
        review_service::create_review(
            state,
            &reviewer,
            &product.to_string(),
            CreateReviewRequest { rating, comment: None },
        )
        .await?;
    }

    let list = |sort: Option<ProductSort>, page: Option<i64>, per_page: Option<i64>| {
        product_service::list_products(
            state,
            ProductQuery {
                category: Some(format!("sort-{tag}")),
                sort,
                page,
                per_page,
                ..Default::default()
            },
        )
    };
    let cases = [
        (Some(ProductSort::PriceAsc), vec![bran, date, almond, cocoa]),
        (Some(ProductSort::PriceDesc), vec![cocoa, almond, date, bran]),
        (Some(ProductSort::Name), vec![almond, bran, cocoa, date]),
        (Some(ProductSort::Newest), vec![date, cocoa, bran, almond]),
        (Some(ProductSort::Rating), vec![cocoa, almond, date, bran]),
        (None, vec![bran, date, cocoa, almond]),
    ];
    for (sort, expected) in cases {
        let listed = list(sort, None, None).await?;
        assert_eq!(ids_of(&listed), expected, "sort {sort:?}");
    }

    let second_page = list(None, Some(2), Some(3)).await?;
    assert_eq!(ids_of(&second_page), vec![almond]);
    let meta = second_page.meta.unwrap();
    assert_eq!(meta.page, Some(2));
    assert_eq!(meta.per_page, Some(3));
    assert_eq!(meta.total, Some(4));
    assert_eq!(meta.total_pages, Some(2));

    let first_page = list(None, Some(0), Some(0)).await?;
    assert_eq!(ids_of(&first_page), vec![bran]);
    let meta = first_page.meta.unwrap();
    assert_eq!((meta.page, meta.per_page, meta.total_pages), (Some(1), Some(1), Some(4)));

    let clamped = list(None, None, Some(1_000)).await?;
    assert_eq!(clamped.meta.as_ref().unwrap().per_page, Some(100));
    assert_eq!(ids_of(&clamped).len(), 4);

    let past_end = list(None, Some(5), Some(3)).await?;
    assert!(ids_of(&past_end).is_empty());

    Ok(())
}

#[tokio::test]
async fn search_wildcards_match_literally() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let admin = create_user(state, true).await?;
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    let category = format!("Literal {tag}");

    let discounted = product_service::create_product(
        state,
        &admin,
        product_request(&format!("Oat 50% Off {tag}"), &category),
    )
    .await?
    .data
    .unwrap();
    product_service::create_product(state, &admin, product_request(&format!("Oat Plain {tag}"), &category))
        .await?;

    let search = |text: &str| {
        product_service::list_products(
            state,
            ProductQuery {
                category: Some(format!("literal-{tag}")),
                search: Some(text.to_string()),
                ..Default::default()
            },
        )
    };

    let percent = search("%").await?.data.unwrap();
    assert_eq!(percent.items.len(), 1);
    assert_eq!(percent.items[0].id, discounted.id);

    let underscore = search("_").await?.data.unwrap();
    assert!(underscore.items.is_empty());

    Ok(())
}

fn address(name: &str) -> CreateAddressRequest {
    CreateAddressRequest {
        full_name: Some(name.into()),
        phone: Some("+1 555 010 3000".into()),
        address: Some("1 Bakery Row".into()),
        city: Some("Austin".into()),
        state: Some("TX".into()),
        zip_code: Some("73301".into()),
        country: None,
        is_default: false,
    }
}

#[tokio::test]
async fn address_book_keeps_exactly_one_default() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = create_user(state, false).await?;

    let home = address_service::create_address(state, &user, address("Home"))
        .await?
        .data
        .unwrap();
    assert!(home.is_default);
    assert_eq!(home.country, "US");

    let work = address_service::create_address(state, &user, address("Work"))
        .await?
        .data
        .unwrap();
    assert!(!work.is_default);

    address_service::set_default_address(state, &user, work.id).await?;
    let listed = address_service::list_addresses(state, &user).await?.data.unwrap();
    let defaults: Vec<_> = listed.items.iter().filter(|a| a.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].id, work.id);

    address_service::delete_address(state, &user, work.id).await?;
    let listed = address_service::list_addresses(state, &user).await?.data.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert!(listed.items[0].is_default);

    let stranger = create_user(state, false).await?;
    let hidden = address_service::delete_address(state, &stranger, home.id).await;
    assert!(matches!(hidden, Err(AppError::NotFound)));

    let incomplete = address_service::create_address(state, &user, CreateAddressRequest::default()).await;
    assert!(matches!(incomplete, Err(AppError::Validation(fields)) if fields.len() == 6));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_default_addresses_leave_one_default() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let user = create_user(&app.state, false).await?;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let state = app.state.clone();
        let user = user.clone();
        tasks.spawn(async move {
            let request = CreateAddressRequest {
                is_default: true,
                ..address(&format!("Branch {i}"))
            };
            address_service::create_address(&state, &user, request).await
        });
    }
    while let Some(created) = tasks.join_next().await {
        created??;
    }

    let listed = address_service::list_addresses(&app.state, &user).await?.data.unwrap();
    assert_eq!(listed.items.len(), 6);
    assert_eq!(listed.items.iter().filter(|a| a.is_default).count(), 1);

    Ok(())
}

#[tokio::test]
async fn admin_reports_are_admin_only() -> anyhow::Result<()> {
    let Some(app) = setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let admin = create_user(state, true).await?;
    let customer = create_user(state, false).await?;

    let denied = admin_service::dashboard(state, &customer).await;
    assert!(matches!(denied, Err(AppError::Forbidden)));

    admin_service::dashboard(state, &admin).await?;

    let report = admin_service::reports(state, &admin, ReportQuery::default())
        .await?
        .data
        .unwrap();
    assert_eq!(report.daily.len(), 30);
    assert!(report.top_products.len() <= 5);

    let backwards = admin_service::reports(
        state,
        &admin,
        ReportQuery {
            from: report.to.succ_opt(),
            to: Some(report.to),
        },
    )
    .await;
    assert!(matches!(backwards, Err(AppError::BadRequest(_))));

    Ok(())
}
