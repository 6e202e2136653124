//! Backend broker status handler.

use homedash_core::BrokerStatus;

use crate::error::CliError;
use crate::output;

use super::Context;

pub async fn handle(ctx: &Context<'_>) -> Result<(), CliError> {
    let status = ctx.dashboard.broker_status().await?;
    let color = output::should_color(&ctx.global.color);

    let detail = |s: &BrokerStatus| {
        let mut fields = vec![(
            "Broker",
            output::status_word(
                if s.connected { "connected" } else { "disconnected" },
                s.connected,
                color,
            ),
        )];
        if let Some(error) = &s.error {
            fields.push(("Error", error.clone()));
        }
        output::render_fields(&fields)
    };

    let out = output::render_single(&ctx.global.output, &status, detail, |s| {
        s.connected.to_string()
    });
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}
