//! Declarative multi-step OAuth 1.0a/2.0 flows: every provider request is data, values resolve
//! from earlier responses, and the ledger crosses the redirect intact.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod executor;
pub mod flows;
pub mod http;
pub mod ledger;
pub mod library;
pub mod oauth1;
pub mod obs;
pub mod params;
pub mod pipeline;
pub mod provider;
pub mod resolve;
pub mod step;
pub mod value;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use indexmap::IndexMap;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use httpmock as _;
