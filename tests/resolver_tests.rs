//! Resolver tier-fallback tests against a seeded catalog.

use anyhow::Result;

use catalog_ingest::application::ProductResolver;
use catalog_ingest::domain::{ParsedProduct, ProductImage};
use catalog_ingest::infrastructure::{CatalogRepository, DatabaseConnection};

async fn seeded_catalog() -> Result<(DatabaseConnection, CatalogRepository)> {
    let db = DatabaseConnection::memory().await?;
    db.migrate().await?;
    let catalog = CatalogRepository::new(db.pool().clone());

    let parsed = ParsedProduct {
        brand: "Aurelle".into(),
        category: "dresses".into(),
        name: "Tempest Dress".into(),
        description: Some("A storm-grey midi dress.".into()),
        price: Some(128.0),
        currency: "USD".into(),
        color: Some("Storm Grey".into()),
        images: vec![],
    };
    let (style_id, variant_id) = catalog
        .upsert_parsed_product(&parsed, "https://shop.aurelle.com/products/tempest-dress")
        .await?;
    catalog
        .upsert_image(&ProductImage {
            variant_id,
            style_id,
            original_url: "https://cdn.aurelle.com/img1.jpg".into(),
            position: 0,
            storage_path: format!("styles/{style_id}/variants/{variant_id}/0-abc.jpg"),
            is_primary: true,
            width: None,
            height: None,
        })
        .await?;

    Ok((db, catalog))
}

#[tokio::test]
async fn exact_match_survives_tracking_noise() -> Result<()> {
    let (_db, catalog) = seeded_catalog().await?;
    let resolver = ProductResolver::new(catalog);

    let matches = resolver
        .resolve("HTTPS://Shop.Aurelle.com/products/tempest-dress?utm_source=ig&fbclid=x#reviews")
        .await?;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].style_name, "Tempest Dress");
    assert_eq!(matches[0].brand_name, "Aurelle");
    assert_eq!(matches[0].list_price, Some(128.0));
    assert!(matches[0].image_path.is_some());
    Ok(())
}

#[tokio::test]
async fn fuzzy_match_on_trailing_path() -> Result<()> {
    let (_db, catalog) = seeded_catalog().await?;
    let resolver = ProductResolver::new(catalog);

    // Different host, same trailing path: no exact hit, fuzzy tier wins.
    let matches = resolver
        .resolve("https://aurelle.com/products/tempest-dress")
        .await?;
    assert_eq!(matches.len(), 1);
    assert_eq!(
        matches[0].url,
        "https://shop.aurelle.com/products/tempest-dress"
    );
    Ok(())
}

#[tokio::test]
async fn product_code_tier_is_last_resort() -> Result<()> {
    let (_db, catalog) = seeded_catalog().await?;
    let resolver = ProductResolver::new(catalog);

    // Neither exact nor trailing-path matches, but the final path segment
    // is a cached product code.
    let matches = resolver
        .resolve("https://m.aurelle.com/mobile/view/tempest-dress")
        .await?;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].style_name, "Tempest Dress");
    assert_eq!(matches[0].brand_name, "Aurelle");
    Ok(())
}

#[tokio::test]
async fn no_match_is_empty_not_error() -> Result<()> {
    let (_db, catalog) = seeded_catalog().await?;
    let resolver = ProductResolver::new(catalog);

    let matches = resolver
        .resolve("https://aurelle.com/products/does-not-exist")
        .await?;
    assert!(matches.is_empty());

    // Malformed input resolves to nothing rather than failing.
    let matches = resolver.resolve("not a url at all").await?;
    assert!(matches.is_empty());
    Ok(())
}
