//! Cofacts GraphQL client: the internal claim database.
//!
//! Articles are reported messages; article replies are the community's
//! fact-checks. Similar-article search doubles as evidence lookup, and a
//! finalized reply can be written back with the `CreateReply` mutation.

use super::{
    EvidenceSource, RawEvidence, ReplySubmitter, SUMMARY_MAX_CHARS, SourceQuery, map_http_status,
    map_transport, one_line,
};
use crate::config::CofactsConfig;
use crate::error::{SourceError, SubmissionError};
use crate::model::EvidenceOrigin;
use crate::render::ReplySubmission;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

const SOURCE_NAME: &str = "cofacts";

const ARTICLE_FIELDS: &str = r#"
  fragment ArticleFields on Article {
    id
    text
    createdAt
    replyCount
    replyRequestCount
    articleReplies(statuses: [NORMAL]) {
      positiveFeedbackCount
      negativeFeedbackCount
      reply {
        id
        type
        text
        reference
        createdAt
      }
    }
  }
"#;

const LIST_ARTICLES: &str = r#"
  query ListArticles($filter: ListArticleFilter!, $orderBy: [ListArticleOrderBy!]!, $first: Int!) {
    ListArticles(filter: $filter, orderBy: $orderBy, first: $first) {
      edges {
        node { ...ArticleFields }
        score
      }
    }
  }
"#;

const GET_ARTICLE: &str = r#"
  query GetArticle($id: String!) {
    GetArticle(id: $id) { ...ArticleFields }
  }
"#;

const CREATE_REPLY: &str = r#"
  mutation CreateReply($articleId: String!, $text: String!, $type: ReplyTypeEnum!, $reference: String!) {
    CreateReply(articleId: $articleId, text: $text, type: $type, reference: $reference) {
      id
    }
  }
"#;

/// A reported message in the Cofacts database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reply_request_count: u32,
    #[serde(default)]
    pub article_replies: Vec<ArticleReply>,
}

impl Article {
    /// The existing reply with the most positive feedback; earliest wins ties.
    pub fn most_helpful_reply(&self) -> Option<&Reply> {
        self.article_replies
            .iter()
            .filter(|ar| ar.reply.is_some())
            .fold(None::<&ArticleReply>, |best, ar| match best {
                Some(b) if b.positive_feedback_count >= ar.positive_feedback_count => Some(b),
                _ => Some(ar),
            })
            .and_then(|ar| ar.reply.as_ref())
    }
}

/// A fact-check attached to an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleReply {
    #[serde(default)]
    pub positive_feedback_count: u32,
    #[serde(default)]
    pub negative_feedback_count: u32,
    #[serde(default)]
    pub reply: Option<Reply>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    #[serde(rename = "type", default)]
    pub reply_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListArticlesData {
    #[serde(rename = "ListArticles")]
    list: Option<ArticleConnection>,
}

#[derive(Debug, Deserialize)]
struct ArticleConnection {
    #[serde(default)]
    edges: Vec<ArticleEdge>,
}

#[derive(Debug, Deserialize)]
struct ArticleEdge {
    node: Article,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GetArticleData {
    #[serde(rename = "GetArticle")]
    article: Option<Article>,
}

#[derive(Debug, Deserialize)]
struct CreateReplyData {
    #[serde(rename = "CreateReply")]
    reply: Option<CreatedReply>,
}

#[derive(Debug, Deserialize)]
struct CreatedReply {
    id: String,
}

/// Client for the Cofacts GraphQL API.
pub struct CofactsClient {
    client: Client,
    endpoint: String,
    site_url: String,
    app_id: Option<String>,
    token: Option<String>,
}

impl CofactsClient {
    /// Create a client from configuration.
    ///
    /// Credentials are read from the configured environment variables; they
    /// are only required for [`submit_reply`](ReplySubmitter::submit_reply).
    pub fn new(config: &CofactsConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::unavailable(SOURCE_NAME, format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
            app_id: std::env::var(&config.app_id_env).ok(),
            token: std::env::var(&config.token_env).ok(),
        })
    }

    /// Override the submission credentials.
    pub fn with_credentials(mut self, app_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self.token = Some(token.into());
        self
    }

    /// Public URL of an article.
    pub fn article_url(&self, id: &str) -> String {
        format!("{}/article/{}", self.site_url, id)
    }

    /// Fetch one article with its existing replies.
    pub async fn article(&self, id: &str) -> Result<Article, SourceError> {
        let query = format!("{ARTICLE_FIELDS}{GET_ARTICLE}");
        let data: GetArticleData = self.execute(&query, json!({ "id": id }), false).await?;
        data.article.ok_or_else(|| SourceError::NotFound {
            source_name: SOURCE_NAME.to_string(),
            id: id.to_string(),
        })
    }

    /// Recent articles that still need fact-checks, most requested first.
    ///
    /// Lists articles created within `days_back` days with fewer than
    /// `reply_count_max` replies.
    pub async fn trending(
        &self,
        days_back: u32,
        reply_count_max: u32,
        limit: usize,
    ) -> Result<Vec<Article>, SourceError> {
        let now = Utc::now();
        let since = now - ChronoDuration::days(i64::from(days_back));
        let variables = json!({
            "filter": {
                "replyCount": { "LT": reply_count_max },
                "createdAt": { "GTE": since.to_rfc3339(), "LTE": now.to_rfc3339() },
            },
            "orderBy": [{ "replyRequestCount": "DESC" }, { "createdAt": "DESC" }],
            "first": limit,
        });
        let edges = self.list_articles(variables).await?;
        Ok(edges.into_iter().map(|e| e.node).collect())
    }

    async fn list_articles(&self, variables: Value) -> Result<Vec<ArticleEdge>, SourceError> {
        let query = format!("{ARTICLE_FIELDS}{LIST_ARTICLES}");
        let data: ListArticlesData = self.execute(&query, variables, false).await?;
        Ok(data.list.map(|l| l.edges).unwrap_or_default())
    }

    /// Convert one article into evidence pointing at its public page.
    fn to_raw_evidence(&self, article: &Article, relevance: f64) -> RawEvidence {
        let reply_line = article
            .most_helpful_reply()
            .and_then(|r| r.text.as_deref())
            .and_then(|t| t.lines().map(str::trim).find(|l| !l.is_empty()));
        let summary = reply_line
            .or(article.text.as_deref())
            .map(|t| one_line(t, SUMMARY_MAX_CHARS))
            .unwrap_or_default();
        RawEvidence {
            url: self.article_url(&article.id),
            summary,
            published_at: article.created_at,
            relevance: relevance.clamp(0.0, 1.0),
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        authenticated: bool,
    ) -> Result<T, SourceError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));
        if authenticated {
            let (Some(app_id), Some(token)) = (&self.app_id, &self.token) else {
                return Err(SourceError::unavailable(
                    SOURCE_NAME,
                    "submission credentials not configured",
                ));
            };
            request = request
                .header("x-app-id", app_id)
                .header("Authorization", format!("Bearer {token}"));
        }

        debug!(endpoint = %self.endpoint, authenticated, "Sending Cofacts GraphQL request");
        let response = request
            .send()
            .await
            .map_err(|e| map_transport(SOURCE_NAME, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_http_status(SOURCE_NAME, status, response.headers()));
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| SourceError::unavailable(SOURCE_NAME, format!("invalid response: {e}")))?;
        if !body.errors.is_empty() {
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(SourceError::unavailable(
                SOURCE_NAME,
                format!("GraphQL errors: {}", messages.join("; ")),
            ));
        }
        body.data
            .ok_or_else(|| SourceError::unavailable(SOURCE_NAME, "response carried no data"))
    }
}

#[async_trait]
impl EvidenceSource for CofactsClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn origin(&self) -> EvidenceOrigin {
        EvidenceOrigin::InternalDatabase
    }

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawEvidence>, SourceError> {
        let variables = json!({
            "filter": { "moreLikeThis": { "like": query.claim_text, "minimumShouldMatch": "0" } },
            "orderBy": [{ "_score": "DESC" }],
            "first": query.limit,
        });
        let edges = self.list_articles(variables).await?;

        let max_score = edges
            .iter()
            .filter_map(|e| e.score)
            .fold(0.0_f64, f64::max);
        let n = edges.len();
        let records = edges
            .iter()
            .enumerate()
            .map(|(i, edge)| {
                let relevance = match edge.score {
                    Some(score) if max_score > 0.0 => score / max_score,
                    _ => 1.0 - i as f64 / n as f64,
                };
                self.to_raw_evidence(&edge.node, relevance)
            })
            .collect();
        Ok(records)
    }

    async fn fetch_detail(&self, evidence_id: &str) -> Result<RawEvidence, SourceError> {
        let article = self.article(evidence_id).await?;
        Ok(self.to_raw_evidence(&article, 1.0))
    }
}

#[async_trait]
impl ReplySubmitter for CofactsClient {
    async fn submit_reply(&self, submission: &ReplySubmission) -> Result<String, SubmissionError> {
        let variables = json!({
            "articleId": submission.article_id,
            "text": submission.text,
            "type": submission.reply_type.as_cofacts(),
            "reference": submission.reference_text(),
        });
        let data: CreateReplyData = self.execute(CREATE_REPLY, variables, true).await?;
        let reply = data.reply.ok_or_else(|| SubmissionError::Rejected {
            message: "CreateReply returned no reply".to_string(),
        })?;
        info!(article_id = %submission.article_id, reply_id = %reply.id, "Reply submitted to Cofacts");
        Ok(reply.id)
    }
}
