use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

use super::media_item::Record;

/// Ordering key understood by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrderKey {
    #[default]
    CreatedAt,
    Random,
}

impl OrderKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

/// Media-type filter. `All` sends no filter at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    #[default]
    All,
    Image,
    Video,
}

impl Category {
    /// Value for the `type` query parameter, `None` for no filter.
    pub fn as_filter(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Image => Some("image"),
            Self::Video => Some("video"),
        }
    }
}

/// Everything that scopes one Collection: changing any field starts over from page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryIdentity {
    pub order: OrderKey,
    pub direction: SortDirection,
    pub category: Category,
    /// Only meaningful for random order; fixed for the session.
    pub seed: Option<u64>,
}

impl QueryIdentity {
    /// Fast, stable cache key for keyed collection storage.
    pub fn cache_key(&self) -> QueryKey {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(self.order.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.direction.as_str().as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.category.as_filter().unwrap_or("all").as_bytes());
        buf.push(0);
        match self.seed {
            Some(seed) => buf.extend_from_slice(&seed.to_le_bytes()),
            None => buf.push(0xff),
        }
        QueryKey(xxh3_64(&buf))
    }
}

impl fmt::Display for QueryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.order.as_str(),
            self.direction.as_str(),
            self.category.as_filter().unwrap_or("all")
        )?;
        if let Some(seed) = self.seed {
            write!(f, "/seed={}", seed)?;
        }
        Ok(())
    }
}

/// Hashed form of a [`QueryIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(pub u64);

/// One server-fetched batch of records plus pagination metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub page_number: u32,
    pub total_records: u64,
    pub total_pages: u32,
    pub next_page: Option<u32>,
    pub prev_page: Option<u32>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_page.is_none()
    }
}

/// Aggregate counts reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub count: u64,
    pub image_count: u64,
    pub video_count: u64,
    pub favorite_count: u64,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_stable() {
        let query = QueryIdentity::default();
        assert_eq!(query.cache_key(), query.cache_key());
    }

    #[test]
    fn test_cache_key_changes_per_field() {
        let base = QueryIdentity::default();
        let variants = [
            QueryIdentity {
                order: OrderKey::Random,
                ..base
            },
            QueryIdentity {
                direction: SortDirection::Asc,
                ..base
            },
            QueryIdentity {
                category: Category::Video,
                ..base
            },
            QueryIdentity {
                seed: Some(42),
                ..base
            },
        ];
        for variant in variants {
            assert_ne!(variant.cache_key(), base.cache_key(), "{}", variant);
        }
    }

    #[test]
    fn test_display() {
        let query = QueryIdentity {
            order: OrderKey::Random,
            direction: SortDirection::Desc,
            category: Category::Image,
            seed: Some(1_700_000_000),
        };
        assert_eq!(query.to_string(), "random/desc/image/seed=1700000000");
    }
}
