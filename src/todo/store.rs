//! Off-chain todo store collaborators.
//!
//! The store is the system of record for todos. The engine reads todos through it and writes back
//! sync metadata once a transaction is confirmed; it never owns user fields.

use crate::todo::types::{Todo, TodoFilter, TodoId, TodoPatch};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("Todo not found: {0}")]
	NotFound(TodoId),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("Unexpected response status {status} from {url}")]
	UnexpectedStatus { status: StatusCode, url: String },
}

/// Access to the off-chain todo store.
#[async_trait::async_trait]
pub trait TodoStore: Send + Sync {
	async fn get_todo(&self, id: &str) -> Result<Todo, StoreError>;

	async fn list_todos(&self, filter: &TodoFilter) -> Result<Vec<Todo>, StoreError>;

	async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<Todo, StoreError>;
}

/// Page envelope returned by `GET /todos`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TodoPage {
	todos: Vec<Todo>,
	page: u32,
	total_pages: u32,
}

/// REST client for the todo API (`/api/v1/todos`).
#[derive(Clone)]
pub struct HttpTodoStore {
	http_client: Client,
	base_url: String,
	api_token: Option<String>,
	page_size: u32,
}

impl HttpTodoStore {
	pub fn new(
		base_url: String,
		api_token: Option<String>,
		timeout: Duration,
	) -> Result<Self, StoreError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
			api_token,
			page_size: 100,
		})
	}

	fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
		let builder = self.http_client.request(method, url);
		match &self.api_token {
			Some(token) => builder.bearer_auth(token),
			None => builder,
		}
	}

	fn check_status(id: Option<&str>, url: &str, status: StatusCode) -> Result<(), StoreError> {
		if status == StatusCode::NOT_FOUND {
			if let Some(id) = id {
				return Err(StoreError::NotFound(id.to_string()));
			}
		}
		if !status.is_success() {
			return Err(StoreError::UnexpectedStatus {
				status,
				url: url.to_string(),
			});
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl TodoStore for HttpTodoStore {
	async fn get_todo(&self, id: &str) -> Result<Todo, StoreError> {
		let url = format!("{}/todos/{}", self.base_url, id);
		let response = self.request(reqwest::Method::GET, &url).send().await?;
		Self::check_status(Some(id), &url, response.status())?;
		Ok(response.json().await?)
	}

	async fn list_todos(&self, filter: &TodoFilter) -> Result<Vec<Todo>, StoreError> {
		let url = format!("{}/todos", self.base_url);
		let mut todos = Vec::new();
		let mut page = 1u32;

		loop {
			let mut query: Vec<(&str, String)> = vec![
				("page", page.to_string()),
				("limit", self.page_size.to_string()),
			];
			if let Some(owner) = &filter.owner_id {
				query.push(("userId", owner.clone()));
			}
			if let Some(completed) = filter.completed {
				query.push(("completed", completed.to_string()));
			}
			if let Some(network) = filter.network {
				query.push(("blockchainNetwork", network.to_string()));
			}

			let response = self
				.request(reqwest::Method::GET, &url)
				.query(&query)
				.send()
				.await?;
			Self::check_status(None, &url, response.status())?;
			let body: TodoPage = response.json().await?;
			debug!(
				"Fetched todo page {}/{} ({} todos)",
				body.page,
				body.total_pages,
				body.todos.len()
			);
			todos.extend(body.todos);

			if body.page >= body.total_pages {
				break;
			}
			page += 1;
		}

		Ok(todos)
	}

	async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<Todo, StoreError> {
		let url = format!("{}/todos/{}", self.base_url, id);
		let response = self
			.request(reqwest::Method::PATCH, &url)
			.json(&patch.to_json())
			.send()
			.await?;
		Self::check_status(Some(id), &url, response.status())?;
		Ok(response.json().await?)
	}
}

/// In-process store.
#[derive(Default)]
pub struct InMemoryTodoStore {
	todos: Mutex<BTreeMap<TodoId, Todo>>,
}

impl InMemoryTodoStore {
	pub fn new(todos: impl IntoIterator<Item = Todo>) -> Self {
		Self {
			todos: Mutex::new(todos.into_iter().map(|t| (t.id.clone(), t)).collect()),
		}
	}

	pub fn insert(&self, todo: Todo) {
		self.todos
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(todo.id.clone(), todo);
	}

	pub fn remove(&self, id: &str) -> Option<Todo> {
		self.todos
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(id)
	}
}

#[async_trait::async_trait]
impl TodoStore for InMemoryTodoStore {
	async fn get_todo(&self, id: &str) -> Result<Todo, StoreError> {
		self.todos
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(id.to_string()))
	}

	async fn list_todos(&self, filter: &TodoFilter) -> Result<Vec<Todo>, StoreError> {
		Ok(self
			.todos
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.values()
			.filter(|todo| filter.matches(todo))
			.cloned()
			.collect())
	}

	async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<Todo, StoreError> {
		let mut todos = self.todos.lock().unwrap_or_else(PoisonError::into_inner);
		let todo = todos
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
		patch.apply(todo);
		Ok(todo.clone())
	}
}

#[cfg(test)]
pub(crate) fn sample_todo(id: &str, title: &str) -> Todo {
	Todo {
		id: id.to_string(),
		title: title.to_string(),
		description: Some(format!("{} description", title)),
		priority: crate::todo::types::Priority::Medium,
		completed: false,
		tags: vec!["work".to_string()],
		due_date: None,
		owner_id: "user123".to_string(),
		created_at: None,
		updated_at: None,
		blockchain_network: None,
		transaction_hash: None,
		blockchain_address: None,
	}
}
