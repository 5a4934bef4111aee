use state_machines::state_machine;

state_machine! {
    name: EnrichmentMachine,
    state: EnrichmentState,
    initial: Ready,
    states: [Ready, Validated, Enriched, Stamped, Persisted, Warmed, Failed],
    events {
        validate { transition: { from: Ready, to: Validated } }
        enrich { transition: { from: Validated, to: Enriched } }
        stamp { transition: { from: Enriched, to: Stamped } }
        persist { transition: { from: Stamped, to: Persisted } }
        warm { transition: { from: Persisted, to: Warmed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Validated, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Stamped, to: Failed }
            transition: { from: Persisted, to: Failed }
            transition: { from: Warmed, to: Failed }
        }
    }
}

pub fn ready() -> EnrichmentMachine<(), Ready> {
    EnrichmentMachine::new(())
}
