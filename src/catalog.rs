use sqlx::{Pool, Row, Sqlite};

/// Catalog entry keyed by a slug of the form `"<company>/<providerModelName>"`.
#[derive(Debug, Clone)]
pub struct Model {
    pub id: String,
    pub slug: String,
}

/// Links a model to an upstream provider identity with per-token cost rates.
/// A model may carry several mappings when more than one provider serves it.
#[derive(Debug, Clone)]
pub struct ProviderMapping {
    pub id: String,
    pub model_id: String,
    pub provider_name: String,
    pub input_token_cost: f64,
    pub output_token_cost: f64,
}

#[derive(Clone)]
pub struct CatalogStore {
    pool: Pool<Sqlite>,
}

impl CatalogStore {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, String> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS models (\
             id TEXT PRIMARY KEY,\
             slug TEXT NOT NULL UNIQUE\
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provider_mappings (\
             id TEXT PRIMARY KEY,\
             model_id TEXT NOT NULL,\
             provider_name TEXT NOT NULL,\
             input_token_cost REAL NOT NULL,\
             output_token_cost REAL NOT NULL\
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }

    pub async fn create_model(&self, slug: &str) -> Result<Model, String> {
        let model = Model {
            id: uuid::Uuid::new_v4().to_string(),
            slug: slug.to_string(),
        };
        sqlx::query("INSERT INTO models (id, slug) VALUES (?, ?)")
            .bind(&model.id)
            .bind(&model.slug)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(model)
    }

    pub async fn add_mapping(
        &self,
        model_id: &str,
        provider_name: &str,
        input_token_cost: f64,
        output_token_cost: f64,
    ) -> Result<ProviderMapping, String> {
        let mapping = ProviderMapping {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: model_id.to_string(),
            provider_name: provider_name.to_string(),
            input_token_cost,
            output_token_cost,
        };
        sqlx::query(
            "INSERT INTO provider_mappings (id, model_id, provider_name, input_token_cost, output_token_cost)\
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&mapping.id)
        .bind(&mapping.model_id)
        .bind(&mapping.provider_name)
        .bind(mapping.input_token_cost)
        .bind(mapping.output_token_cost)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(mapping)
    }

    pub async fn find_model_by_slug(&self, slug: &str) -> Result<Option<Model>, String> {
        let row = sqlx::query("SELECT id, slug FROM models WHERE slug = ?")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(row
            .map(|r| -> Result<Model, String> {
                Ok(Model {
                    id: r.try_get("id").map_err(|e| e.to_string())?,
                    slug: r.try_get("slug").map_err(|e| e.to_string())?,
                })
            })
            .transpose()?)
    }

    pub async fn mappings_for_model(&self, model_id: &str) -> Result<Vec<ProviderMapping>, String> {
        let rows = sqlx::query(
            "SELECT id, model_id, provider_name, input_token_cost, output_token_cost \
             FROM provider_mappings WHERE model_id = ? ORDER BY id",
        )
        .bind(model_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ProviderMapping {
                id: row.try_get("id").map_err(|e| e.to_string())?,
                model_id: row.try_get("model_id").map_err(|e| e.to_string())?,
                provider_name: row.try_get("provider_name").map_err(|e| e.to_string())?,
                input_token_cost: row.try_get("input_token_cost").map_err(|e| e.to_string())?,
                output_token_cost: row.try_get("output_token_cost").map_err(|e| e.to_string())?,
            });
        }
        Ok(out)
    }
}

/// Provider-selection policy: one mapping chosen uniformly at random. No
/// weighting, no health awareness, no failover to another mapping.
pub fn select_mapping(mappings: &[ProviderMapping]) -> Option<&ProviderMapping> {
    if mappings.is_empty() {
        return None;
    }
    let index = random_u64(mappings.len() as u64) as usize;
    mappings.get(index)
}

fn random_u64(bound: u64) -> u64 {
    if bound <= 1 {
        return 0;
    }
    let seed = uuid::Uuid::new_v4().as_u128() as u64;
    seed % bound
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(id: &str) -> ProviderMapping {
        ProviderMapping {
            id: id.to_string(),
            model_id: "m".to_string(),
            provider_name: "OpenAI".to_string(),
            input_token_cost: 1.0,
            output_token_cost: 2.0,
        }
    }

    #[test]
    fn select_none_on_empty() {
        assert!(select_mapping(&[]).is_none());
    }

    #[test]
    fn select_single_is_deterministic() {
        let mappings = vec![mapping("only")];
        assert_eq!(select_mapping(&mappings).unwrap().id, "only");
    }

    #[test]
    fn selection_is_roughly_uniform() {
        let mappings: Vec<ProviderMapping> =
            (0..4).map(|i| mapping(&format!("m{i}"))).collect();
        let trials = 4000usize;
        let mut counts = std::collections::HashMap::new();
        for _ in 0..trials {
            let chosen = select_mapping(&mappings).unwrap();
            *counts.entry(chosen.id.clone()).or_insert(0usize) += 1;
        }
        assert_eq!(counts.len(), 4);
        let expected = trials / 4;
        for (id, count) in counts {
            // generous tolerance: within 30% of the expected share
            assert!(
                count > expected * 7 / 10 && count < expected * 13 / 10,
                "mapping {id} chosen {count} times, expected ~{expected}"
            );
        }
    }
}
