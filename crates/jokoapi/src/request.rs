use crate::prelude::*;

/// A GET request to one endpoint of the api, without the base url.
///
/// Most endpoints come in the same three shapes, so there's a constructor for each:
/// * [ApiRequest::collection_ids] -> `/colors` returns all ids
/// * [ApiRequest::singleton] -> `/colors?id=10` returns one object
/// * [ApiRequest::collection] -> `/colors?ids=10,11` (or `ids=all`) returns a list of objects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiRequest {
    endpoint: String,
    query: Vec<(String, String)>,
}

impl ApiRequest {
    /// `endpoint` is only the path below the base url, eg: `/worlds`.
    /// query pairs go through [Self::with_query]; a `?` or `#` in the endpoint makes
    /// [crate::ApiClient::url] fail with [crate::ApiError::InvalidEndpoint].
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: vec![],
        }
    }

    pub fn collection_ids(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint)
    }

    pub fn singleton(endpoint: impl Into<String>, id: impl Display) -> Self {
        Self::new(endpoint).with_query("id", id)
    }

    /// `None` asks for every entry. an empty slice is rejected because the api would reject it anyway.
    pub fn collection<I: Display>(endpoint: impl Into<String>, ids: Option<&[I]>) -> Result<Self> {
        let ids = match ids {
            None => "all".to_string(),
            Some([]) => return Err(ApiError::EmptyIds),
            Some(ids) => ids
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        };
        Ok(Self::new(endpoint).with_query("ids", ids))
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// https://wiki.guildwars2.com/wiki/API:2#Paging
    pub fn page(self, page: u32, page_size: u32) -> Self {
        self.with_query("page", page)
            .with_query("page_size", page_size)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }
}
