//! Directed peer linking between two node handles.

use tracing::info;

use crate::error::Result;
use crate::node::Node;

/// Makes `from` connect to `to`, using the endpoint and connection key that
/// `to` reports. Directed: linking A to B does not link B to A.
pub async fn link(from: &mut dyn Node, to: &mut dyn Node) -> Result<()> {
    let endpoint = to.sync_endpoint();
    let pubkey = to.connection_pubkey().await?;
    info!(
        from = %from.working_dir().display(),
        to = %to.working_dir().display(),
        %endpoint,
        "connecting nodes"
    );
    from.connect_to(&endpoint, &pubkey).await
}
