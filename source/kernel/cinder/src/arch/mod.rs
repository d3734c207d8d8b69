// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture specific support code
//! OWNERS: @kernel-arch-team
//! PUBLIC API: arch backends under `arch::<isa>`
//! DEPENDS_ON: per-ISA modules (cortex_m)
//! INVARIANTS: Raw register access and exception entry glue stay behind this boundary
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m;
