//! Catalog persistence: idempotent upserts and resolver lookups.
//!
//! All writes are upserts keyed by natural uniqueness constraints, so
//! re-running extraction for the same product never creates duplicates
//! or lost updates. Best-effort denormalizations (product_url, price
//! history) are allowed to fail without failing the task; style and
//! variant upserts are not.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::sync::Arc;
use tracing::warn;

use crate::domain::{ParsedProduct, ProductImage, ProductMatch};

#[derive(Clone)]
pub struct CatalogRepository {
    pool: Arc<SqlitePool>,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn upsert_brand(&self, name: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO brand (name) VALUES (?)
            ON CONFLICT (name) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&*self.pool)
        .await
        .with_context(|| format!("failed to upsert brand '{name}'"))?;
        Ok(row.get("id"))
    }

    pub async fn upsert_category(&self, name: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO category (name) VALUES (?)
            ON CONFLICT (name) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(name)
        .fetch_one(&*self.pool)
        .await
        .with_context(|| format!("failed to upsert category '{name}'"))?;
        Ok(row.get("id"))
    }

    /// Upsert a style on its (brand_id, category_id, name) identity.
    /// Description keeps the existing value when the new one is absent.
    /// The gender column is never written by extraction; nothing on a
    /// PDP supplies it.
    pub async fn upsert_style(
        &self,
        brand_id: i64,
        category_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO style (brand_id, category_id, name, description, is_active)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT (brand_id, category_id, name) DO UPDATE SET
                description = COALESCE(excluded.description, style.description),
                is_active = 1
            RETURNING id
            "#,
        )
        .bind(brand_id)
        .bind(category_id)
        .bind(name)
        .bind(description)
        .fetch_one(&*self.pool)
        .await
        .with_context(|| format!("failed to upsert style '{name}'"))?;
        Ok(row.get("id"))
    }

    /// One variant per style: the upsert is keyed on style_id alone.
    /// The extracted color lives here; it keeps the existing value when
    /// the new one is absent.
    pub async fn upsert_variant(&self, style_id: i64, color: Option<&str>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO variant (style_id, color) VALUES (?, ?)
            ON CONFLICT (style_id) DO UPDATE SET
                color = COALESCE(excluded.color, variant.color)
            RETURNING id
            "#,
        )
        .bind(style_id)
        .bind(color)
        .fetch_one(&*self.pool)
        .await
        .context("failed to upsert variant")?;
        Ok(row.get("id"))
    }

    /// Unique on url; re-pointing a URL to a different variant overwrites
    /// ownership.
    pub async fn upsert_product_url(&self, variant_id: i64, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_url (variant_id, url, is_current)
            VALUES (?, ?, 1)
            ON CONFLICT (url) DO UPDATE SET
                variant_id = excluded.variant_id,
                is_current = 1
            "#,
        )
        .bind(variant_id)
        .bind(url)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Append-only price observation.
    pub async fn append_price(&self, variant_id: i64, list_price: f64, currency: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO price_history (variant_id, list_price, currency, captured_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(variant_id)
        .bind(list_price)
        .bind(currency)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Unique on (variant_id, original_url): re-extraction refreshes
    /// position and storage path but never duplicates an image row.
    pub async fn upsert_image(&self, image: &ProductImage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO product_images
                (variant_id, style_id, original_url, position, storage_path, is_primary, width, height)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (variant_id, original_url) DO UPDATE SET
                position = excluded.position,
                storage_path = excluded.storage_path,
                is_primary = excluded.is_primary
            "#,
        )
        .bind(image.variant_id)
        .bind(image.style_id)
        .bind(&image.original_url)
        .bind(image.position)
        .bind(&image.storage_path)
        .bind(image.is_primary)
        .bind(image.width)
        .bind(image.height)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Remember the product code a PDP URL carried, for the resolver's
    /// tertiary lookup tier.
    pub async fn cache_product_code(&self, code: &str, brand_id: i64, style_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resolver_cache (product_code, brand_id, style_id)
            VALUES (?, ?, ?)
            ON CONFLICT (product_code) DO UPDATE SET
                brand_id = excluded.brand_id,
                style_id = excluded.style_id
            "#,
        )
        .bind(code)
        .bind(brand_id)
        .bind(style_id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Persist an extracted product: brand, category, style, variant plus
    /// the best-effort url/price denormalizations. Returns
    /// (style_id, variant_id) for image archival.
    pub async fn upsert_parsed_product(
        &self,
        parsed: &ParsedProduct,
        pdp_url: &str,
    ) -> Result<(i64, i64)> {
        let brand_id = self.upsert_brand(&parsed.brand).await?;
        let category_id = self.upsert_category(&parsed.category).await?;
        let style_id = self
            .upsert_style(
                brand_id,
                category_id,
                &parsed.name,
                parsed.description.as_deref(),
            )
            .await?;
        let variant_id = self
            .upsert_variant(style_id, parsed.color.as_deref())
            .await?;

        // Best-effort tables: keep the pipeline moving on violation.
        if let Err(e) = self.upsert_product_url(variant_id, pdp_url).await {
            warn!("product_url upsert failed for {pdp_url}: {e}");
        }
        if let Some(price) = parsed.price {
            if let Err(e) = self.append_price(variant_id, price, &parsed.currency).await {
                warn!("price append failed for {pdp_url}: {e}");
            }
        }
        if let Some(code) = product_code_of(pdp_url) {
            if let Err(e) = self.cache_product_code(&code, brand_id, style_id).await {
                warn!("resolver cache write failed for {pdp_url}: {e}");
            }
        }

        Ok((style_id, variant_id))
    }

    pub async fn image_count(&self, variant_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM product_images WHERE variant_id = ?")
            .bind(variant_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // -------------------------------------------------------------------
    // Resolver lookups
    // -------------------------------------------------------------------

    /// Exact-match lookup on the rich view (latest price + primary image).
    pub async fn find_exact_with_images(&self, url: &str) -> Result<Vec<ProductMatch>> {
        let rows = sqlx::query(&rich_view_sql("pu.url = ?"))
            .bind(url)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(match_from_rich_row).collect()
    }

    /// Fuzzy lookup: any current URL ending with the trailing fragment.
    pub async fn find_fuzzy_with_images(&self, suffix: &str) -> Result<Vec<ProductMatch>> {
        let rows = sqlx::query(&rich_view_sql("pu.url LIKE '%' || ? ESCAPE '\\'"))
            .bind(escape_like(suffix))
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(match_from_rich_row).collect()
    }

    /// Columnar fallback without image or price data.
    pub async fn find_exact_basic(&self, url: &str) -> Result<Vec<ProductMatch>> {
        let rows = sqlx::query(&basic_view_sql("pu.url = ?"))
            .bind(url)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(match_from_basic_row).collect()
    }

    pub async fn find_fuzzy_basic(&self, suffix: &str) -> Result<Vec<ProductMatch>> {
        let rows = sqlx::query(&basic_view_sql("pu.url LIKE '%' || ? ESCAPE '\\'"))
            .bind(escape_like(suffix))
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(match_from_basic_row).collect()
    }

    /// Tertiary tier: cached product-code lookup, enriched with brand and
    /// style names via secondary joins.
    pub async fn find_by_product_code(&self, code: &str) -> Result<Vec<ProductMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT v.id AS variant_id, s.id AS style_id, s.name AS style_name,
                   b.name AS brand_name,
                   COALESCE((SELECT url FROM product_url pu
                             WHERE pu.variant_id = v.id AND pu.is_current = 1
                             LIMIT 1), '') AS url
            FROM resolver_cache rc
            JOIN style s ON s.id = rc.style_id
            JOIN brand b ON b.id = rc.brand_id
            JOIN variant v ON v.style_id = s.id
            WHERE rc.product_code = ?
            "#,
        )
        .bind(code)
        .fetch_all(&*self.pool)
        .await?;
        rows.iter().map(match_from_basic_row).collect()
    }
}

/// Escape LIKE metacharacters so URL suffixes match literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Last path segment of a PDP URL, used as the cached product code.
pub fn product_code_of(pdp_url: &str) -> Option<String> {
    let parsed = url::Url::parse(pdp_url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_ascii_lowercase())
}

fn rich_view_sql(predicate: &str) -> String {
    format!(
        r#"
        SELECT v.id AS variant_id, s.id AS style_id, s.name AS style_name,
               b.name AS brand_name, pu.url AS url,
               (SELECT ph.list_price FROM price_history ph
                WHERE ph.variant_id = v.id
                ORDER BY ph.captured_at DESC LIMIT 1) AS list_price,
               (SELECT ph.currency FROM price_history ph
                WHERE ph.variant_id = v.id
                ORDER BY ph.captured_at DESC LIMIT 1) AS currency,
               (SELECT pi.storage_path FROM product_images pi
                WHERE pi.variant_id = v.id AND pi.is_primary = 1
                LIMIT 1) AS image_path
        FROM product_url pu
        JOIN variant v ON v.id = pu.variant_id
        JOIN style s ON s.id = v.style_id
        JOIN brand b ON b.id = s.brand_id
        WHERE pu.is_current = 1 AND {predicate}
        ORDER BY v.id ASC
        "#
    )
}

fn basic_view_sql(predicate: &str) -> String {
    format!(
        r#"
        SELECT v.id AS variant_id, s.id AS style_id, s.name AS style_name,
               b.name AS brand_name, pu.url AS url
        FROM product_url pu
        JOIN variant v ON v.id = pu.variant_id
        JOIN style s ON s.id = v.style_id
        JOIN brand b ON b.id = s.brand_id
        WHERE pu.is_current = 1 AND {predicate}
        ORDER BY v.id ASC
        "#
    )
}

fn match_from_rich_row(row: &SqliteRow) -> Result<ProductMatch> {
    Ok(ProductMatch {
        variant_id: row.get("variant_id"),
        style_id: row.get("style_id"),
        style_name: row.get("style_name"),
        brand_name: row.get("brand_name"),
        url: row.get("url"),
        list_price: row.get("list_price"),
        currency: row.get("currency"),
        image_path: row.get("image_path"),
    })
}

fn match_from_basic_row(row: &SqliteRow) -> Result<ProductMatch> {
    Ok(ProductMatch {
        variant_id: row.get("variant_id"),
        style_id: row.get("style_id"),
        style_name: row.get("style_name"),
        brand_name: row.get("brand_name"),
        url: row.get("url"),
        list_price: None,
        currency: None,
        image_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;

    fn parsed() -> ParsedProduct {
        ParsedProduct {
            brand: "Aurelle".into(),
            category: "dresses".into(),
            name: "Tempest Dress".into(),
            description: Some("A storm-grey midi dress.".into()),
            price: Some(128.0),
            currency: "USD".into(),
            color: None,
            images: vec![],
        }
    }

    async fn repo() -> Result<CatalogRepository> {
        let db = DatabaseConnection::memory().await?;
        db.migrate().await?;
        Ok(CatalogRepository::new(db.pool().clone()))
    }

    #[tokio::test]
    async fn double_upsert_is_idempotent() -> Result<()> {
        let catalog = repo().await?;
        let url = "https://aurelle.com/products/tempest-dress";

        let (style_a, variant_a) = catalog.upsert_parsed_product(&parsed(), url).await?;
        let (style_b, variant_b) = catalog.upsert_parsed_product(&parsed(), url).await?;
        assert_eq!(style_a, style_b);
        assert_eq!(variant_a, variant_b);

        let styles: i64 = sqlx::query("SELECT COUNT(*) AS n FROM style")
            .fetch_one(&*catalog.pool)
            .await?
            .get("n");
        let variants: i64 = sqlx::query("SELECT COUNT(*) AS n FROM variant")
            .fetch_one(&*catalog.pool)
            .await?
            .get("n");
        assert_eq!(styles, 1);
        assert_eq!(variants, 1);

        // Price history is append-only: two observations.
        let prices: i64 = sqlx::query("SELECT COUNT(*) AS n FROM price_history")
            .fetch_one(&*catalog.pool)
            .await?
            .get("n");
        assert_eq!(prices, 2);
        Ok(())
    }

    #[tokio::test]
    async fn description_keeps_existing_when_new_absent() -> Result<()> {
        let catalog = repo().await?;
        let url = "https://aurelle.com/products/tempest-dress";
        catalog.upsert_parsed_product(&parsed(), url).await?;

        let mut without_description = parsed();
        without_description.description = None;
        let (style_id, _) = catalog
            .upsert_parsed_product(&without_description, url)
            .await?;

        let description: Option<String> = sqlx::query("SELECT description FROM style WHERE id = ?")
            .bind(style_id)
            .fetch_one(&*catalog.pool)
            .await?
            .get("description");
        assert_eq!(description.as_deref(), Some("A storm-grey midi dress."));
        Ok(())
    }

    #[tokio::test]
    async fn extracted_color_lands_on_the_variant_not_style_gender() -> Result<()> {
        let catalog = repo().await?;
        let mut with_color = parsed();
        with_color.color = Some("Storm Grey".into());

        let (style_id, variant_id) = catalog
            .upsert_parsed_product(&with_color, "https://aurelle.com/products/tempest-dress")
            .await?;

        let gender: Option<String> = sqlx::query("SELECT gender FROM style WHERE id = ?")
            .bind(style_id)
            .fetch_one(&*catalog.pool)
            .await?
            .get("gender");
        assert_eq!(gender, None);

        let color: Option<String> = sqlx::query("SELECT color FROM variant WHERE id = ?")
            .bind(variant_id)
            .fetch_one(&*catalog.pool)
            .await?
            .get("color");
        assert_eq!(color.as_deref(), Some("Storm Grey"));

        // A later extraction without a color keeps the recorded one.
        catalog
            .upsert_parsed_product(&parsed(), "https://aurelle.com/products/tempest-dress")
            .await?;
        let color: Option<String> = sqlx::query("SELECT color FROM variant WHERE id = ?")
            .bind(variant_id)
            .fetch_one(&*catalog.pool)
            .await?
            .get("color");
        assert_eq!(color.as_deref(), Some("Storm Grey"));
        Ok(())
    }

    #[tokio::test]
    async fn image_rows_never_duplicate() -> Result<()> {
        let catalog = repo().await?;
        let (style_id, variant_id) = catalog
            .upsert_parsed_product(&parsed(), "https://aurelle.com/products/tempest-dress")
            .await?;

        let image = ProductImage {
            variant_id,
            style_id,
            original_url: "https://cdn.aurelle.com/img1.jpg".into(),
            position: 0,
            storage_path: format!("styles/{style_id}/variants/{variant_id}/0-abc.jpg"),
            is_primary: true,
            width: None,
            height: None,
        };
        catalog.upsert_image(&image).await?;
        catalog.upsert_image(&image).await?;
        assert_eq!(catalog.image_count(variant_id).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn url_repointing_overwrites_ownership() -> Result<()> {
        let catalog = repo().await?;
        let url = "https://aurelle.com/products/tempest-dress";
        let (_, variant_a) = catalog.upsert_parsed_product(&parsed(), url).await?;

        let mut other = parsed();
        other.name = "Squall Dress".into();
        let (_, variant_b) = catalog.upsert_parsed_product(&other, url).await?;
        assert_ne!(variant_a, variant_b);

        let owner: i64 = sqlx::query("SELECT variant_id FROM product_url WHERE url = ?")
            .bind(url)
            .fetch_one(&*catalog.pool)
            .await?
            .get("variant_id");
        assert_eq!(owner, variant_b);
        Ok(())
    }

    #[test]
    fn product_code_comes_from_last_path_segment() {
        assert_eq!(
            product_code_of("https://aurelle.com/products/Tempest-Dress?utm_source=x"),
            Some("tempest-dress".into())
        );
        assert_eq!(product_code_of("https://aurelle.com/"), None);
    }
}
